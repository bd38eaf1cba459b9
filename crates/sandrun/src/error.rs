use std::{fmt, time::Duration};

use thiserror::Error;

use crate::id::RunId;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Script reference with an unknown or missing `type` tag.
    #[error("unsupported script source: {0}")]
    UnsupportedSourceKind(String),

    #[error("invalid script source: {0}")]
    InvalidSource(String),

    #[error("failed to read script '{path}': {message}")]
    SourceReadFailure { path: String, message: String },

    /// A recognised source kind with no backend; names the exact reference.
    #[error("{0} is not implemented")]
    NotImplementedSource(String),

    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("script failed to load: {0}")]
    CompileFailure(String),

    #[error("script does not define a `run` function")]
    MissingEntryPoint,

    #[error("script result is not JSON-serializable: {0}")]
    SerializationError(String),

    /// A host capability failed and the guest did not handle it.
    #[error("capability call failed: {0}")]
    CapabilityFailure(String),

    /// Thrown or rejected by guest code.
    #[error("{0}")]
    Guest(String),

    #[error("script execution timed out after {}ms", .0.as_millis())]
    ExecutionTimeout(Duration),

    #[error("script exceeded memory limit of {0} MB")]
    MemoryLimitExceeded(u64),

    #[error("internal engine error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedSourceKind,
    InvalidSource,
    SourceReadFailure,
    NotImplementedSource,
    InvalidConfig,
    CompileFailure,
    MissingEntryPoint,
    SerializationError,
    CapabilityFailure,
    GuestError,
    ExecutionTimeout,
    MemoryLimitExceeded,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedSourceKind => "UnsupportedSourceKind",
            Self::InvalidSource => "InvalidSource",
            Self::SourceReadFailure => "SourceReadFailure",
            Self::NotImplementedSource => "NotImplementedSource",
            Self::InvalidConfig => "InvalidConfig",
            Self::CompileFailure => "CompileFailure",
            Self::MissingEntryPoint => "MissingEntryPoint",
            Self::SerializationError => "SerializationError",
            Self::CapabilityFailure => "CapabilityFailure",
            Self::GuestError => "GuestError",
            Self::ExecutionTimeout => "ExecutionTimeout",
            Self::MemoryLimitExceeded => "MemoryLimitExceeded",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedSourceKind(_) => ErrorKind::UnsupportedSourceKind,
            Self::InvalidSource(_) => ErrorKind::InvalidSource,
            Self::SourceReadFailure { .. } => ErrorKind::SourceReadFailure,
            Self::NotImplementedSource(_) => ErrorKind::NotImplementedSource,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::CompileFailure(_) => ErrorKind::CompileFailure,
            Self::MissingEntryPoint => ErrorKind::MissingEntryPoint,
            Self::SerializationError(_) => ErrorKind::SerializationError,
            Self::CapabilityFailure(_) => ErrorKind::CapabilityFailure,
            Self::Guest(_) => ErrorKind::GuestError,
            Self::ExecutionTimeout(_) => ErrorKind::ExecutionTimeout,
            Self::MemoryLimitExceeded(_) => ErrorKind::MemoryLimitExceeded,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// An [`Error`] tagged with the run that produced it.
///
/// Displays as `[run <id>] <message>`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[run {run_id}] {error}")]
pub struct RunError {
    pub run_id: RunId,
    #[source]
    pub error: Error,
}

impl RunError {
    #[must_use]
    pub const fn new(run_id: RunId, error: Error) -> Self {
        Self { run_id, error }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}
