//! Runs untrusted JavaScript against caller-supplied credentials inside a
//! memory- and time-bounded QuickJS context.
//!
//! Every run gets a fresh runtime, a fixed set of host capabilities and a
//! correlation id. Values only cross the boundary as JSON copies.

pub mod capability;
pub mod config;
mod context;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod host;
pub mod id;
mod limiter;
mod marshal;
#[cfg(feature = "request")]
pub mod request;
pub mod result;
pub mod source;

pub const TRACE_TARGET_SCRIPT: &str = "sandrun::script";

pub use capability::{Capability, CapabilitySet};
pub use config::{EngineConfig, RunConfig};
pub use context::ContextState;
pub use credentials::Credentials;
pub use driver::Engine;
pub use error::{Error, ErrorKind, Result, RunError};
pub use host::{BoxError, Host, HttpRequest, HttpResponse, LogLevel, LogRecord};
pub use id::RunId;
pub use result::ExecutionResult;
pub use source::ScriptSource;
