use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tracing::event;
use url::Url;

use crate::{TRACE_TARGET_SCRIPT, id::RunId};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

/// Fully buffered response handed back to the capability layer.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `logger.*` call made by a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub run_id: RunId,
    pub level: LogLevel,
    pub message: String,
}

/// Host services the capability bridge delegates to.
#[async_trait::async_trait]
pub trait Host: Send + Sync + 'static {
    /// Perform an HTTP request and buffer the response body.
    ///
    /// Implementations own redirect behavior and header hygiene. In particular,
    /// remove any caller-supplied `Host` header before dispatching.
    async fn http_request(&self, req: HttpRequest) -> core::result::Result<HttpResponse, BoxError>;

    /// Receive a guest log record. The default emits a `log` event on
    /// [`TRACE_TARGET_SCRIPT`].
    fn log(&self, record: &LogRecord) {
        let run_id = record.run_id.as_str();
        let message = record.message.as_str();
        match record.level {
            LogLevel::Debug => event!(
                name: "log",
                target: TRACE_TARGET_SCRIPT,
                tracing::Level::DEBUG,
                run_id,
                log.output = message,
                log.context = "guest",
            ),
            LogLevel::Info => event!(
                name: "log",
                target: TRACE_TARGET_SCRIPT,
                tracing::Level::INFO,
                run_id,
                log.output = message,
                log.context = "guest",
            ),
            LogLevel::Warn => event!(
                name: "log",
                target: TRACE_TARGET_SCRIPT,
                tracing::Level::WARN,
                run_id,
                log.output = message,
                log.context = "guest",
            ),
            LogLevel::Error => event!(
                name: "log",
                target: TRACE_TARGET_SCRIPT,
                tracing::Level::ERROR,
                run_id,
                log.output = message,
                log.context = "guest",
            ),
        }
    }
}

#[async_trait::async_trait]
impl<T: Host + ?Sized> Host for Arc<T> {
    async fn http_request(&self, req: HttpRequest) -> core::result::Result<HttpResponse, BoxError> {
        (**self).http_request(req).await
    }

    fn log(&self, record: &LogRecord) {
        (**self).log(record);
    }
}
