//! Default [`Host`] backed by a shared `reqwest` client.

mod config;
mod error;
mod http;

use tracing::{Instrument, field::Empty, info_span};

pub use config::RequestConfig;
pub use error::Error;

use crate::{
    TRACE_TARGET_SCRIPT,
    host::{BoxError, Host, HttpRequest, HttpResponse},
};

#[derive(Clone, Debug)]
pub struct ReqwestHost {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl ReqwestHost {
    /// # Errors
    /// Returns an error if the proxy URL is invalid or the client cannot be
    /// built.
    pub fn new(config: &RequestConfig) -> Result<Self, Error> {
        Ok(Self {
            client: config.build_client()?,
            max_response_bytes: config.max_response_bytes,
        })
    }
}

#[async_trait::async_trait]
impl Host for ReqwestHost {
    async fn http_request(&self, req: HttpRequest) -> core::result::Result<HttpResponse, BoxError> {
        let span = info_span!(
            target: TRACE_TARGET_SCRIPT,
            "http.request",
            http.request.method = %req.method,
            url.full = %req.url,
            http.response.status_code = Empty,
            http.response.body.size = Empty,
            otel.status_code = Empty,
        );
        http::http_impl(&self.client, req, self.max_response_bytes)
            .instrument(span)
            .await
            .map_err(Into::into)
    }
}
