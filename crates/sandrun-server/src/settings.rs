use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use sandrun::{EngineConfig, request::RequestConfig};

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub script_dir: PathBuf,
    pub execution_timeout: Duration,
    pub memory_limit_mb: u64,
    pub max_stack_kb: usize,
    pub http_proxy: Option<String>,
    pub max_concurrent_runs: usize,
}

impl Settings {
    pub const DEFAULT_PORT: u16 = 3000;
    pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 64;

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            port: parse_env("PORT")?.unwrap_or(Self::DEFAULT_PORT),
            script_dir: env::var_os("SANDRUN_SCRIPT_DIR")
                .map_or_else(|| PathBuf::from("./scripts"), PathBuf::from),
            execution_timeout: parse_env("SANDRUN_EXECUTION_TIMEOUT_MS")?
                .map_or(EngineConfig::DEFAULT_EXECUTION_TIMEOUT, Duration::from_millis),
            memory_limit_mb: parse_env("SANDRUN_MEMORY_LIMIT_MB")?
                .unwrap_or(EngineConfig::DEFAULT_MEMORY_LIMIT_MB),
            max_stack_kb: parse_env("SANDRUN_MAX_STACK_KB")?
                .filter(|kb| *kb > 0)
                .unwrap_or(EngineConfig::DEFAULT_MAX_STACK_SIZE / 1024),
            http_proxy: env::var("SANDRUN_HTTP_PROXY").ok().filter(|p| !p.is_empty()),
            max_concurrent_runs: parse_env("SANDRUN_MAX_CONCURRENT_RUNS")?
                .unwrap_or(Self::DEFAULT_MAX_CONCURRENT_RUNS)
                .max(1),
        })
    }

    pub const fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .execution_timeout(self.execution_timeout)
            .memory_limit_mb(self.memory_limit_mb)
            .max_stack_size(self.max_stack_kb.saturating_mul(1024))
    }

    pub fn request_config(&self) -> RequestConfig {
        let config = RequestConfig::default();
        match &self.http_proxy {
            Some(proxy) => config.with_proxy(proxy.clone()),
            None => config,
        }
    }
}

fn parse_env<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {name}: {value:?}")),
        _ => Ok(None),
    }
}
