use std::sync::Arc;

use rquickjs::{Ctx, Function, Object, Value, function::Rest};

use super::Bridge;
use crate::{
    host::{Host, LogLevel, LogRecord},
    id::RunId,
    marshal,
};

/// Fresh `logger` object for one run, closed over that run's id.
pub(super) fn logger<'js, H: Host>(
    ctx: &Ctx<'js>,
    bridge: &Bridge<H>,
) -> rquickjs::Result<Object<'js>> {
    let logger = Object::new(ctx.clone())?;
    for level in [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ] {
        let host = Arc::clone(&bridge.host);
        let run_id = bridge.run_id.clone();
        logger.set(
            level.as_str(),
            Function::new(ctx.clone(), move |args: Rest<Value<'js>>| {
                emit(host.as_ref(), &run_id, level, args.0);
            })?
            .with_name(level.as_str())?,
        )?;
    }
    Ok(logger)
}

fn emit<H: Host>(host: &H, run_id: &RunId, level: LogLevel, args: Vec<Value<'_>>) {
    let message = args
        .into_iter()
        .map(format_value)
        .collect::<Vec<_>>()
        .join(" ");
    host.log(&LogRecord {
        run_id: run_id.clone(),
        level,
        message,
    });
}

fn format_value(value: Value<'_>) -> String {
    if let Some(s) = value.as_string() {
        return s.to_string().unwrap_or_default();
    }
    if let Some(exception) = value.as_exception() {
        let name: Option<String> = exception.get("name").ok();
        let message = exception.message().unwrap_or_default();
        return match name {
            Some(name) if !name.is_empty() => format!("{name}: {message}"),
            _ => message,
        };
    }
    if value.is_undefined() {
        return "undefined".to_string();
    }
    let type_name = value.type_of().as_str();
    marshal::to_json(value)
        .map_or_else(|_| format!("[{type_name}]"), |json| json.to_string())
}
