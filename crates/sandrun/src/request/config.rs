use super::Error;

const USER_AGENT: &str = concat!("Sandrun/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestConfig {
    pub proxy: Option<String>,
    /// Responses larger than this are rejected instead of buffered.
    pub max_response_bytes: usize,
}

impl RequestConfig {
    pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    #[must_use]
    pub const fn with_max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes;
        self
    }

    pub(super) fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(proxy_str) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy_str)?;
            builder = builder.proxy(proxy);
        }
        Ok(builder.build()?)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            max_response_bytes: Self::DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}
