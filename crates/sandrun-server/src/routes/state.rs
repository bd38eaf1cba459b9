use std::sync::Arc;

use sandrun::{Engine, request::ReqwestHost};
use tokio::sync::Semaphore;

use crate::{settings::Settings, store::ScriptStore};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine<ReqwestHost>,
    pub store: Arc<ScriptStore>,
    /// Bounds how many isolation contexts exist at once.
    pub permits: Arc<Semaphore>,
}

impl AppState {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let engine = Engine::with_request_config(&settings.request_config(), settings.engine_config())?;
        let store = ScriptStore::open(&settings.script_dir).await?;
        tracing::info!(
            script_dir = %store.dir().display(),
            max_concurrent_runs = settings.max_concurrent_runs,
            "script store ready"
        );
        Ok(Self::from_parts(engine, store, settings.max_concurrent_runs))
    }

    pub fn from_parts(engine: Engine<ReqwestHost>, store: ScriptStore, max_concurrent_runs: usize) -> Self {
        Self {
            engine,
            store: Arc::new(store),
            permits: Arc::new(Semaphore::new(max_concurrent_runs)),
        }
    }
}
