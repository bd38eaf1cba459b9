use sandrun::{Credentials, RunConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// Tagged source reference, see [`sandrun::ScriptSource::from_json`].
    pub source: serde_json::Value,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub config: RunConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct StagedExecuteRequest {
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub config: RunConfig,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: HttpError,
}

#[derive(Debug, Serialize)]
pub struct HttpError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    NotFound,
    Internal,
}
