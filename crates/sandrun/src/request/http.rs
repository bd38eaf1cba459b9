use bytes::BytesMut;
use futures::StreamExt;
use http::header::HOST;
use tracing::Span;

use super::Error;
use crate::host::{HttpRequest, HttpResponse};

pub(super) async fn http_impl(
    client: &reqwest::Client,
    mut request: HttpRequest,
    max_body: usize,
) -> Result<HttpResponse, Error> {
    // The client derives `Host` from the URL.
    request.headers.remove(HOST);
    let mut builder = client
        .request(request.method, request.url)
        .headers(request.headers);
    if let Some(body) = request.body {
        builder = builder.body(body);
    }
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }

    let span = Span::current();
    let resp = match builder.send().await {
        Ok(r) => {
            let status = r.status();
            span.record("http.response.status_code", status.as_u16());
            if status.is_server_error() || status.is_client_error() {
                span.record("otel.status_code", "ERROR");
            }
            r
        }
        Err(e) => {
            span.record("otel.status_code", "ERROR");
            return Err(Error::Http(e));
        }
    };

    let too_large = Error::BodyTooLarge { limit: max_body };
    if resp
        .content_length()
        .is_some_and(|len| len > u64::try_from(max_body).unwrap_or(u64::MAX))
    {
        return Err(too_large);
    }

    let status = resp.status();
    let headers = resp.headers().clone();
    let mut body = BytesMut::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > max_body {
            span.record("otel.status_code", "ERROR");
            return Err(too_large);
        }
        body.extend_from_slice(&chunk);
    }
    span.record(
        "http.response.body.size",
        u64::try_from(body.len()).unwrap_or(u64::MAX),
    );

    Ok(HttpResponse {
        status,
        headers,
        body: body.freeze(),
    })
}
