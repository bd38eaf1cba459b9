use std::time::{Duration, Instant};

use anyhow::Result;
use sandrun::{Capability, CapabilitySet, Credentials, EngineConfig, ErrorKind, RunConfig, ScriptSource};
use serde_json::json;

use super::common::{engine, engine_with};

#[tokio::test]
async fn pending_promise_times_out() -> Result<()> {
    let started = Instant::now();
    let result = engine()?
        .run(
            &ScriptSource::inline("function run() { return new Promise(() => {}); }"),
            &Credentials::new(),
            &RunConfig::default().execution_timeout(Duration::from_millis(50)),
        )
        .await;
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert_eq!(result.error_kind(), Some("ExecutionTimeout"));
    assert!(elapsed >= Duration::from_millis(45), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "returned late: {elapsed:?}");
    Ok(())
}

#[tokio::test]
async fn busy_loop_is_interrupted() -> Result<()> {
    let started = Instant::now();
    let err = engine()?
        .execute(
            &ScriptSource::inline("function run() { for (;;) {} }"),
            &Credentials::new(),
            &RunConfig::default().execution_timeout(Duration::from_millis(100)),
        )
        .await
        .expect_err("loop should not finish");

    assert_eq!(err.kind(), ErrorKind::ExecutionTimeout);
    assert!(err.to_string().ends_with("timed out after 100ms"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[tokio::test]
async fn busy_loop_at_top_level_is_interrupted() -> Result<()> {
    let err = engine()?
        .execute(
            &ScriptSource::inline("while (true) {} function run() {}"),
            &Credentials::new(),
            &RunConfig::default().execution_timeout(Duration::from_millis(100)),
        )
        .await
        .expect_err("loop should not finish");
    assert_eq!(err.kind(), ErrorKind::ExecutionTimeout);
    Ok(())
}

#[tokio::test]
async fn guest_cannot_catch_the_deadline() -> Result<()> {
    let err = engine()?
        .execute(
            &ScriptSource::inline(
                "function run() { try { for (;;) {} } catch (e) { return 'escaped'; } }",
            ),
            &Credentials::new(),
            &RunConfig::default().execution_timeout(Duration::from_millis(100)),
        )
        .await
        .expect_err("interrupt should not be catchable");
    assert_eq!(err.kind(), ErrorKind::ExecutionTimeout);
    Ok(())
}

#[tokio::test]
async fn memory_ceiling_is_enforced() -> Result<()> {
    let err = engine()?
        .execute(
            &ScriptSource::inline(
                "function run() {
                    const chunks = [];
                    for (;;) { chunks.push(new Array(100000).fill(1)); }
                }",
            ),
            &Credentials::new(),
            &RunConfig::default().memory_limit_mb(16),
        )
        .await
        .expect_err("allocation should hit the ceiling");

    assert_eq!(err.kind(), ErrorKind::MemoryLimitExceeded, "{err}");
    assert!(err.to_string().contains("16 MB"), "{err}");
    Ok(())
}

#[tokio::test]
async fn guest_cannot_impersonate_out_of_memory() -> Result<()> {
    let engine = engine()?;
    for script in [
        "function run() { throw Object.assign(new Error('out of memory'), { name: 'InternalError' }); }",
        "function run() { throw new InternalError('out of memory'); }",
    ] {
        let err = engine
            .execute(&ScriptSource::inline(script), &Credentials::new(), &RunConfig::default())
            .await
            .expect_err("guest throw should fail the run");
        assert_eq!(err.kind(), ErrorKind::GuestError, "{script}: {err}");
        assert!(err.to_string().ends_with("InternalError: out of memory"), "{err}");
    }
    Ok(())
}

#[tokio::test]
async fn default_stack_allows_deep_recursion() -> Result<()> {
    let engine = engine()?;
    let value = engine
        .execute(
            &ScriptSource::inline(
                "function depth(n) { return n === 0 ? 0 : 1 + depth(n - 1); }
                 function run() { return depth(1000); }",
            ),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await?;
    assert_eq!(value, json!(1000));

    let err = engine
        .execute(
            &ScriptSource::inline("function run() { return 1 + run(); }"),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await
        .expect_err("unbounded recursion should overflow");
    assert_eq!(err.kind(), ErrorKind::GuestError);
    assert!(err.to_string().contains("RangeError"), "{err}");
    Ok(())
}

#[tokio::test]
async fn zero_timeout_is_invalid_config() -> Result<()> {
    let config: RunConfig = serde_json::from_value(json!({"executionTimeout": 0}))?;
    let result = engine()?
        .run(&ScriptSource::inline("function run() {}"), &Credentials::new(), &config)
        .await;
    assert_eq!(result.error_kind(), Some("InvalidConfig"));
    Ok(())
}

#[tokio::test]
async fn revoked_capability_is_not_defined() -> Result<()> {
    let (engine, _) = engine_with(
        EngineConfig::new().capabilities(
            CapabilitySet::all()
                .without(Capability::HttpPost)
                .without(Capability::Logger),
        ),
    )?;

    let value = engine
        .execute(
            &ScriptSource::inline(
                "function run() { return ['httpGet', 'httpPost', 'logger', 'sleep'].filter((n) => n in globalThis); }",
            ),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await?;
    assert_eq!(value, json!(["httpGet", "sleep"]));

    let err = engine
        .execute(
            &ScriptSource::inline("function run() { logger.info('hi'); }"),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await
        .expect_err("logger was revoked");
    assert_eq!(err.kind(), ErrorKind::GuestError);
    assert!(err.to_string().contains("ReferenceError"), "{err}");
    Ok(())
}
