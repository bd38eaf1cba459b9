use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{error::RunError, id::RunId};

/// What a caller gets back from [`Engine::run`](crate::Engine::run),
/// successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// RFC 3339 with millisecond precision.
    pub timestamp: String,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    /// Top-level fields of a framed guest result that are not part of the
    /// contract.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ExecutionResult {
    /// Frame a guest return value.
    ///
    /// An object carrying a boolean `success` is taken as already framed and
    /// its fields are kept as they are; only a missing `timestamp` or
    /// `metadata` is filled in. Anything else becomes `data` of a successful
    /// result.
    #[must_use]
    pub fn from_payload(run_id: &RunId, payload: Value) -> Self {
        match payload {
            Value::Object(mut fields) if fields.get("success").is_some_and(Value::is_boolean) => {
                let success = fields
                    .remove("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or_default();
                let timestamp = match fields.remove("timestamp") {
                    Some(Value::String(ts)) => ts,
                    _ => now(),
                };
                Self {
                    success,
                    data: fields.remove("data"),
                    error: fields.remove("error"),
                    timestamp,
                    metadata: fields.remove("metadata").unwrap_or_else(empty_object),
                    extra: fields,
                }
            }
            data => Self {
                success: true,
                data: Some(data),
                error: None,
                timestamp: now(),
                metadata: json!({ "runId": run_id }),
                extra: Map::new(),
            },
        }
    }

    #[must_use]
    pub fn from_error(err: &RunError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(Value::String(err.to_string())),
            timestamp: now(),
            metadata: json!({
                "runId": err.run_id,
                "errorKind": err.kind().as_str(),
            }),
            extra: Map::new(),
        }
    }

    /// Failure kind recorded by [`from_error`](Self::from_error), if any.
    #[must_use]
    pub fn error_kind(&self) -> Option<&str> {
        self.metadata.get("errorKind").and_then(Value::as_str)
    }
}

impl From<RunError> for ExecutionResult {
    fn from(err: RunError) -> Self {
        Self::from_error(&err)
    }
}
