use std::{
    env::args,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, anyhow};
use sandrun::{Credentials, Engine, RunConfig, ScriptSource};
use settings::Settings;
use utils::trace::init_tracing;

mod routes;
mod server;
mod settings;
mod store;
mod utils;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing()?;
    let settings = Settings::from_env()?;

    let task = args().nth(1);
    match task.as_deref() {
        None | Some("serve") => {
            let state = routes::AppState::new(&settings).await?;
            let prometheus = routes::install_metrics()?;
            server::serve(routes::router(&state, prometheus), settings.port).await?;
            Ok(ExitCode::SUCCESS)
        }
        Some("run") => {
            let script = args()
                .nth(2)
                .map(PathBuf::from)
                .context("usage: sandrun-server run <script.js> [credentials.json]")?;
            let credentials = match args().nth(3) {
                Some(path) => read_credentials(Path::new(&path)).await?,
                None => Credentials::new(),
            };
            run_once(&settings, script, &credentials).await
        }
        Some(other) => Err(anyhow!("unknown task: {other}")),
    }
}

async fn read_credentials(path: &Path) -> anyhow::Result<Credentials> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Credentials::try_from(value).with_context(|| format!("invalid credentials in {}", path.display()))
}

async fn run_once(settings: &Settings, script: PathBuf, credentials: &Credentials) -> anyhow::Result<ExitCode> {
    let engine = Engine::with_request_config(&settings.request_config(), settings.engine_config())?;
    let result = engine
        .run(&ScriptSource::file(script), credentials, &RunConfig::default())
        .await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
