use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::future::{join, join_all};
use sandrun::{Credentials, ErrorKind, RunConfig, RunId, ScriptSource};
use serde_json::json;

use super::common::{engine, engine_with};

#[tokio::test]
async fn framed_result_passes_through() -> Result<()> {
    let result = engine()?
        .run(
            &ScriptSource::inline(
                "function run(credentials) { return { success: true, data: credentials.x * 2 }; }",
            ),
            &Credentials::new().with("x", 21),
            &RunConfig::default(),
        )
        .await;

    assert!(result.success, "unexpected failure: {result:?}");
    assert_eq!(result.data, Some(json!(42)));
    assert!(result.error.is_none());
    Ok(())
}

#[tokio::test]
async fn remote_blob_is_not_implemented() -> Result<()> {
    let source = ScriptSource::from_json(&json!({"type": "s3", "bucket": "b", "key": "k"}))
        .context("s3 reference should parse")?;
    let err = engine()?
        .execute(&source, &Credentials::new(), &RunConfig::default())
        .await
        .expect_err("remote sources must not resolve");

    assert_eq!(err.kind(), ErrorKind::NotImplementedSource);
    let message = err.to_string();
    assert!(message.contains("'b'") && message.contains("'k'"), "{message}");
    Ok(())
}

#[tokio::test]
async fn missing_entry_point_returns_no_data() -> Result<()> {
    let result = engine()?
        .run(
            &ScriptSource::inline("const helper = () => 1;"),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await;

    assert!(!result.success);
    assert!(result.data.is_none());
    assert_eq!(result.error_kind(), Some("MissingEntryPoint"));
    let error = result.error.as_ref().and_then(|e| e.as_str()).unwrap_or_default();
    assert!(error.starts_with("[run "), "{error}");
    Ok(())
}

#[tokio::test]
async fn syntax_and_top_level_errors_fail_compilation() -> Result<()> {
    let engine = engine()?;
    for code in ["function run( {", "throw new Error('boom'); function run() {}"] {
        let err = engine
            .execute(&ScriptSource::inline(code), &Credentials::new(), &RunConfig::default())
            .await
            .expect_err("script should not load");
        assert_eq!(err.kind(), ErrorKind::CompileFailure, "{code}: {err}");
    }
    Ok(())
}

#[tokio::test]
async fn guest_throw_and_rejection_are_guest_errors() -> Result<()> {
    let engine = engine()?;

    let err = engine
        .execute(
            &ScriptSource::inline("function run() { throw new TypeError('bad input'); }"),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await
        .expect_err("throw should fail the run");
    assert_eq!(err.kind(), ErrorKind::GuestError);
    assert!(err.to_string().ends_with("TypeError: bad input"), "{err}");

    let err = engine
        .execute(
            &ScriptSource::inline("async function run() { await sleep(1); throw new Error('late'); }"),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await
        .expect_err("rejection should fail the run");
    assert_eq!(err.kind(), ErrorKind::GuestError);
    assert!(err.to_string().ends_with("] late"), "{err}");
    Ok(())
}

#[tokio::test]
async fn guest_cannot_mutate_credentials() -> Result<()> {
    let credentials = Credentials::new()
        .with("token", "secret")
        .with("nested", json!({"scopes": ["read"]}));
    let value = engine()?
        .execute(
            &ScriptSource::inline(
                "function run(c) { c.token = 'stolen'; c.nested.scopes.push('write'); delete c.extra; return c; }",
            ),
            &credentials,
            &RunConfig::default(),
        )
        .await?;

    assert_eq!(value, json!({"token": "stolen", "nested": {"scopes": ["read", "write"]}}));
    assert_eq!(credentials.as_map()["token"], "secret");
    assert_eq!(credentials.as_map()["nested"], json!({"scopes": ["read"]}));
    Ok(())
}

#[tokio::test]
async fn unserializable_results_are_rejected() -> Result<()> {
    let engine = engine()?;
    for code in [
        "function run() { return { f: () => 1 }; }",
        "function run() { return 10n; }",
        "function run() { const a = {}; a.self = a; return a; }",
    ] {
        let err = engine
            .execute(&ScriptSource::inline(code), &Credentials::new(), &RunConfig::default())
            .await
            .expect_err("result should not serialize");
        assert_eq!(err.kind(), ErrorKind::SerializationError, "{code}: {err}");
    }

    let result = engine
        .run(
            &ScriptSource::inline("function run() {}"),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await;
    assert!(result.success);
    assert_eq!(result.data, Some(json!(null)));
    Ok(())
}

#[tokio::test]
async fn file_sources_are_read_from_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("hello.js");
    tokio::fs::write(&path, "function run(c) { return `hello ${c.name}`; }").await?;

    let engine = engine()?;
    let value = engine
        .execute(
            &ScriptSource::file(&path),
            &Credentials::new().with("name", "world"),
            &RunConfig::default(),
        )
        .await?;
    assert_eq!(value, json!("hello world"));

    let err = engine
        .execute(
            &ScriptSource::file(dir.path().join("missing.js")),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await
        .expect_err("missing file should fail");
    assert_eq!(err.kind(), ErrorKind::SourceReadFailure);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_keep_their_own_logs() -> Result<()> {
    let (engine, host) = engine_with(sandrun::EngineConfig::new())?;
    let source = ScriptSource::inline(
        "async function run(c) {
            logger.info('start', c.tenant);
            await sleep(20);
            logger.warn('done', c.tenant);
            return c.tenant;
        }",
    );

    let runs = (0..8).map(|i| {
        let engine = engine.clone();
        let source = source.clone();
        tokio::spawn(async move {
            let credentials = Credentials::new().with("tenant", format!("t{i}"));
            engine.run(&source, &credentials, &RunConfig::default()).await
        })
    });

    for result in join_all(runs).await {
        let result = result?;
        assert!(result.success, "{result:?}");
        let tenant = result.data.as_ref().and_then(|d| d.as_str()).context("tenant")?;
        let run_id = result.metadata["runId"].as_str().context("runId")?;
        assert_eq!(
            host.logs_for(&RunId::from(run_id)),
            [format!("info: start {tenant}"), format!("warn: done {tenant}")]
        );
    }
    Ok(())
}

#[tokio::test]
async fn entry_point_is_looked_up_once() -> Result<()> {
    let value = engine()?
        .execute(
            &ScriptSource::inline(
                "let lookups = 0;
                 Object.defineProperty(globalThis, 'run', {
                     get() {
                         lookups += 1;
                         return lookups === 1 ? () => lookups : undefined;
                     },
                 });",
            ),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await?;
    assert_eq!(value, json!(1));
    Ok(())
}

#[tokio::test]
async fn globals_do_not_leak_between_runs() -> Result<()> {
    let engine = engine()?;
    engine
        .execute(
            &ScriptSource::inline(
                "function run() { globalThis.leaked = 'a'; Object.prototype.polluted = true; }",
            ),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await?;

    let value = engine
        .execute(
            &ScriptSource::inline(
                "function run() { return [typeof leaked, ({}).polluted === undefined]; }",
            ),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await?;
    assert_eq!(value, json!(["undefined", true]));

    let writer = ScriptSource::inline(
        "async function run() { globalThis.leak = 1; await sleep(50); return typeof leak; }",
    );
    let reader = ScriptSource::inline("async function run() { await sleep(10); return typeof leak; }");
    let (written, read) = join(
        engine.execute(&writer, &Credentials::new(), &RunConfig::default()),
        engine.execute(&reader, &Credentials::new(), &RunConfig::default()),
    )
    .await;
    assert_eq!(written?, json!("number"));
    assert_eq!(read?, json!("undefined"));
    Ok(())
}

#[tokio::test]
async fn pending_runs_do_not_block_each_other() -> Result<()> {
    let engine = engine()?;
    let source = ScriptSource::inline("async function run(c) { await sleep(200); return c.n; }");
    let first = Credentials::new().with("n", 1);
    let second = Credentials::new().with("n", 2);

    let started = Instant::now();
    let (a, b) = join(
        engine.execute(&source, &first, &RunConfig::default()),
        engine.execute(&source, &second, &RunConfig::default()),
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!((a?, b?), (json!(1), json!(2)));
    assert!(elapsed < Duration::from_millis(350), "runs were serialized: {elapsed:?}");
    Ok(())
}
