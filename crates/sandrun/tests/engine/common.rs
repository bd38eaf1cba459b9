use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sandrun::{
    BoxError, Engine, EngineConfig, Host, HttpRequest, HttpResponse, LogRecord, RunId,
    request::{ReqwestHost, RequestConfig},
};

/// Real HTTP through [`ReqwestHost`], guest logs kept in memory.
pub struct TestHost {
    inner: ReqwestHost,
    logs: Mutex<Vec<LogRecord>>,
}

impl TestHost {
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: ReqwestHost::new(&RequestConfig::default())
                .context("failed to build http client")?,
            logs: Mutex::new(Vec::new()),
        })
    }

    pub fn logs_for(&self, run_id: &RunId) -> Vec<String> {
        self.logs
            .lock()
            .expect("log mutex poisoned")
            .iter()
            .filter(|r| &r.run_id == run_id)
            .map(|r| format!("{}: {}", r.level, r.message))
            .collect()
    }
}

#[async_trait]
impl Host for TestHost {
    async fn http_request(&self, req: HttpRequest) -> std::result::Result<HttpResponse, BoxError> {
        self.inner.http_request(req).await
    }

    fn log(&self, record: &LogRecord) {
        self.logs
            .lock()
            .expect("log mutex poisoned")
            .push(record.clone());
    }
}

pub fn engine_with(config: EngineConfig) -> Result<(Engine<TestHost>, Arc<TestHost>)> {
    let host = Arc::new(TestHost::new()?);
    Ok((Engine::from_shared(Arc::clone(&host), config), host))
}

pub fn engine() -> Result<Engine<TestHost>> {
    Ok(engine_with(EngineConfig::new())?.0)
}
