use anyhow::Context;
use sandrun::TRACE_TARGET_SCRIPT;
use tracing::Level;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Console logging filtered by `RUST_LOG`, `info` when unset. Guest
/// `logger.*` output is kept at `info` unless `RUST_LOG` names its target.
pub fn init_tracing() -> anyhow::Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let envfilter = env_filter(rust_log.as_deref())?;

    tracing_subscriber::Registry::default()
        .with(tracing_subscriber::fmt::Layer::default().with_filter(envfilter))
        .try_init()
        .context("failed to install tracing subscriber")
}

fn env_filter(directives: Option<&str>) -> anyhow::Result<EnvFilter> {
    let directives = directives.unwrap_or_default();
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .parse(directives)
        .with_context(|| format!("invalid {}: {directives:?}", EnvFilter::DEFAULT_ENV))?;
    if directives.contains(TRACE_TARGET_SCRIPT) {
        return Ok(filter);
    }
    Ok(filter.add_directive(format!("{TRACE_TARGET_SCRIPT}=info").parse()?))
}
