use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::types::{ErrorCode, ErrorResponse, HttpError};
use crate::store::StoreError;

#[derive(Debug)]
pub struct HttpApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl HttpApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        let status = match self.code {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            error: HttpError {
                code: self.code,
                message: self.message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for HttpApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl From<StoreError> for HttpApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidName(_) => Self::invalid_request(err.to_string()),
            StoreError::NotFound(_) => Self::new(ErrorCode::NotFound, err.to_string()),
            StoreError::Io(e) => {
                tracing::error!(error = %e, "script store I/O failed");
                Self::internal("script store unavailable")
            }
        }
    }
}

impl std::fmt::Display for HttpApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for HttpApiError {}
