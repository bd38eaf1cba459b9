use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    capability::CapabilitySet,
    error::{Error, Result},
};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Per-run overrides, in the JSON shape callers send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Whole-run deadline in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_timeout: Option<u64>,
    /// Guest heap ceiling in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<u64>,
}

impl RunConfig {
    #[must_use]
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub const fn memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit = Some(mb);
        self
    }
}

/// Effective limits of one run after applying [`RunConfig`] over the engine
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    pub memory_limit_mb: u64,
    pub memory_limit_bytes: usize,
    pub max_stack_size: usize,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub execution_timeout: Duration,
    pub memory_limit_mb: u64,
    pub max_stack_size: usize,
    /// Capabilities installed into every run.
    pub capabilities: CapabilitySet,
    /// Default per-request timeout for `httpGet`/`httpPost`. `None` leaves
    /// requests bounded only by the run deadline.
    pub http_timeout: Option<Duration>,
}

impl EngineConfig {
    pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 128;
    pub const DEFAULT_MAX_STACK_SIZE: usize = 1024 * 1024;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            execution_timeout: Self::DEFAULT_EXECUTION_TIMEOUT,
            memory_limit_mb: Self::DEFAULT_MEMORY_LIMIT_MB,
            max_stack_size: Self::DEFAULT_MAX_STACK_SIZE,
            capabilities: CapabilitySet::all(),
            http_timeout: None,
        }
    }

    #[must_use]
    pub const fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    #[must_use]
    pub const fn max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = bytes;
        self
    }

    #[must_use]
    pub const fn capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub const fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// # Errors
    /// [`Error::InvalidConfig`] for zero or unrepresentable limits.
    pub fn limits(&self, run: &RunConfig) -> Result<Limits> {
        let timeout = run
            .execution_timeout
            .map_or(self.execution_timeout, Duration::from_millis);
        if timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "executionTimeout must be greater than zero".to_string(),
            ));
        }

        let memory_limit_mb = run.memory_limit.unwrap_or(self.memory_limit_mb);
        if memory_limit_mb == 0 {
            return Err(Error::InvalidConfig(
                "memoryLimit must be greater than zero".to_string(),
            ));
        }
        let memory_limit_bytes = memory_limit_mb
            .checked_mul(BYTES_PER_MB)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| {
                Error::InvalidConfig(format!("memoryLimit of {memory_limit_mb} MB is too large"))
            })?;

        Ok(Limits {
            timeout,
            memory_limit_mb,
            memory_limit_bytes,
            max_stack_size: self.max_stack_size,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
