use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{Instrument, debug, field::Empty, info, info_span, warn};

use crate::{
    TRACE_TARGET_SCRIPT,
    config::{EngineConfig, RunConfig},
    context::IsolationContext,
    credentials::Credentials,
    error::{Error, Result, RunError},
    host::Host,
    id::RunId,
    result::ExecutionResult,
    source::ScriptSource,
};

/// Runs scripts, one fresh isolation context per call.
///
/// An `Engine` holds no guest state, so a single instance can serve any
/// number of concurrent runs.
pub struct Engine<H> {
    host: Arc<H>,
    config: EngineConfig,
}

impl<H> Clone for Engine<H> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
            config: self.config.clone(),
        }
    }
}

#[cfg(feature = "request")]
impl Engine<crate::request::ReqwestHost> {
    /// Engine whose capabilities reach the network through `reqwest`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_request_config(
        request: &crate::request::RequestConfig,
        config: EngineConfig,
    ) -> Result<Self, crate::request::Error> {
        Ok(Self::new(crate::request::ReqwestHost::new(request)?, config))
    }
}

impl<H: Host> Engine<H> {
    pub fn new(host: H, config: EngineConfig) -> Self {
        Self::from_shared(Arc::new(host), config)
    }

    pub const fn from_shared(host: Arc<H>, config: EngineConfig) -> Self {
        Self { host, config }
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Run `source` and frame the outcome. Never fails: errors come back as
    /// `success: false` results.
    pub async fn run(
        &self,
        source: &ScriptSource,
        credentials: &Credentials,
        config: &RunConfig,
    ) -> ExecutionResult {
        let (run_id, result) = self.traced(source, credentials, config).await;
        match result {
            Ok(payload) => ExecutionResult::from_payload(&run_id, payload),
            Err(err) => ExecutionResult::from_error(&RunError::new(run_id, err)),
        }
    }

    /// Run `source` and return the guest's settled return value.
    ///
    /// # Errors
    /// Any failure of the run, tagged with its [`RunId`].
    pub async fn execute(
        &self,
        source: &ScriptSource,
        credentials: &Credentials,
        config: &RunConfig,
    ) -> Result<Value, RunError> {
        let (run_id, result) = self.traced(source, credentials, config).await;
        result.map_err(|err| RunError::new(run_id, err))
    }

    async fn traced(
        &self,
        source: &ScriptSource,
        credentials: &Credentials,
        config: &RunConfig,
    ) -> (RunId, Result<Value>) {
        let run_id = RunId::generate();
        let span = info_span!(
            target: TRACE_TARGET_SCRIPT,
            "script.run",
            run_id = %run_id,
            source.kind = source.kind(),
            error.kind = Empty,
        );

        let started = Instant::now();
        let result = self
            .execute_in(&run_id, source, credentials, config)
            .instrument(span.clone())
            .await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        span.in_scope(|| match &result {
            Ok(_) => info!(target: TRACE_TARGET_SCRIPT, elapsed_ms, "script run completed"),
            Err(err) => {
                span.record("error.kind", err.kind().as_str());
                warn!(
                    target: TRACE_TARGET_SCRIPT,
                    elapsed_ms,
                    error.kind = err.kind().as_str(),
                    error.message = %err,
                    "script run failed"
                );
            }
        });
        (run_id, result)
    }

    async fn execute_in(
        &self,
        run_id: &RunId,
        source: &ScriptSource,
        credentials: &Credentials,
        config: &RunConfig,
    ) -> Result<Value> {
        let limits = self.config.limits(config)?;
        let code = source.resolve().await?;

        let deadline = Instant::now().checked_add(limits.timeout).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "executionTimeout of {}ms is too large",
                limits.timeout.as_millis()
            ))
        })?;
        let mut context = IsolationContext::create(run_id.clone(), &limits, deadline).await?;
        let result = self.drive(&mut context, &code, credentials).await;

        let state = context.state();
        let heap_bytes = context.heap_bytes().await;
        debug!(
            target: TRACE_TARGET_SCRIPT,
            ?state,
            heap_bytes,
            "releasing isolation context"
        );
        drop(context);
        result
    }

    async fn drive(
        &self,
        context: &mut IsolationContext,
        code: &str,
        credentials: &Credentials,
    ) -> Result<Value> {
        context.bind_globals().await?;
        context
            .install_capabilities(
                Arc::clone(&self.host),
                self.config.capabilities,
                self.config.http_timeout,
            )
            .await?;
        context.compile(code).await?;
        context.invoke(credentials).await
    }
}
