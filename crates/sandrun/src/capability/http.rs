use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, header::CONTENT_TYPE};
use rquickjs::{
    Coerced, Ctx, Exception, Function, Value,
    function::{Async, Opt},
};
use serde_json::Value as Json;
use url::Url;

use super::{Bridge, capability_error};
use crate::{
    host::{Host, HttpRequest, HttpResponse},
    marshal,
};

/// `options` accepted by `httpGet`/`httpPost`.
#[derive(Debug, Default)]
struct RequestOptions {
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl RequestOptions {
    fn from_guest(options: Option<Value<'_>>) -> Result<Self, String> {
        let Some(options) = options else {
            return Ok(Self::default());
        };
        let fields = match marshal::to_json(options)? {
            Json::Null => return Ok(Self::default()),
            Json::Object(fields) => fields,
            _ => return Err("options must be an object".to_string()),
        };

        let timeout = match fields.get("timeout") {
            None | Some(Json::Null) => None,
            Some(Json::Number(ms)) => match ms.as_f64() {
                Some(ms) if ms.is_finite() && ms > 0.0 => Some(Duration::from_secs_f64(ms / 1000.0)),
                _ => return Err("options.timeout must be a positive number".to_string()),
            },
            Some(_) => return Err("options.timeout must be a number".to_string()),
        };

        Ok(Self {
            headers: string_pairs(fields.get("headers"), "headers")?,
            params: string_pairs(fields.get("params"), "params")?,
            timeout,
        })
    }

    fn into_request(
        self,
        method: Method,
        url: &str,
        body: Option<Body>,
        default_timeout: Option<Duration>,
    ) -> Result<HttpRequest, String> {
        let mut url = Url::parse(url).map_err(|e| format!("invalid URL '{url}': {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("unsupported URL scheme '{}'", url.scheme()));
        }
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.params);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| format!("invalid header name '{name}'"))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| format!("invalid value for header '{name}'"))?;
            headers.append(name, value);
        }

        let body = body.map(|body| {
            if let Some(content_type) = body.content_type
                && !headers.contains_key(CONTENT_TYPE)
            {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
            body.bytes
        });

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
            timeout: self.timeout.or(default_timeout),
        })
    }
}

struct Body {
    bytes: Bytes,
    content_type: Option<&'static str>,
}

impl Body {
    /// Strings go out verbatim; everything else is sent as JSON.
    fn from_guest(value: Option<Value<'_>>) -> Result<Option<Self>, String> {
        let Some(value) = value.filter(|v| !v.is_undefined() && !v.is_null()) else {
            return Ok(None);
        };
        if let Some(s) = value.as_string() {
            let text = s.to_string().map_err(|e| e.to_string())?;
            return Ok(Some(Self {
                bytes: Bytes::from(text),
                content_type: None,
            }));
        }
        let json = marshal::to_json(value)?;
        let bytes = serde_json::to_vec(&json).map_err(|e| e.to_string())?;
        Ok(Some(Self {
            bytes: Bytes::from(bytes),
            content_type: Some("application/json"),
        }))
    }
}

fn string_pairs(value: Option<&Json>, field: &str) -> Result<Vec<(String, String)>, String> {
    let fields = match value {
        None | Some(Json::Null) => return Ok(Vec::new()),
        Some(Json::Object(fields)) => fields,
        Some(_) => return Err(format!("options.{field} must be an object")),
    };
    fields
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| match v {
            Json::String(s) => Ok((k.clone(), s.clone())),
            Json::Number(n) => Ok((k.clone(), n.to_string())),
            Json::Bool(b) => Ok((k.clone(), b.to_string())),
            _ => Err(format!(
                "options.{field}.{k} must be a string, number or boolean"
            )),
        })
        .collect()
}

/// Parsed JSON when the body is JSON, otherwise the body as text.
fn decode_body(response: &HttpResponse) -> Json {
    if response.body.is_empty() {
        return Json::Null;
    }
    serde_json::from_slice(&response.body)
        .unwrap_or_else(|_| Json::String(String::from_utf8_lossy(&response.body).into_owned()))
}

async fn dispatch<'js, H: Host>(
    ctx: &Ctx<'js>,
    host: &H,
    request: HttpRequest,
) -> rquickjs::Result<Value<'js>> {
    let response = host
        .http_request(request)
        .await
        .map_err(|e| capability_error(ctx, &e.to_string()))?;
    if !response.status.is_success() {
        return Err(capability_error(
            ctx,
            &format!(
                "Request failed with status code {}",
                response.status.as_u16()
            ),
        ));
    }
    marshal::from_json(ctx, &decode_body(&response)).map_err(|e| capability_error(ctx, &e))
}

pub(super) fn http_get<'js, H: Host>(
    ctx: &Ctx<'js>,
    bridge: &Bridge<H>,
) -> rquickjs::Result<Function<'js>> {
    let host = Arc::clone(&bridge.host);
    let default_timeout = bridge.http_timeout;
    Function::new(
        ctx.clone(),
        Async(
            move |ctx: Ctx<'js>, url: Coerced<String>, options: Opt<Value<'js>>| {
                let host = Arc::clone(&host);
                async move {
                    let request = RequestOptions::from_guest(options.0)
                        .and_then(|o| o.into_request(Method::GET, &url.0, None, default_timeout))
                        .map_err(|e| Exception::throw_type(&ctx, &e))?;
                    dispatch(&ctx, host.as_ref(), request).await
                }
            },
        ),
    )?
    .with_name("httpGet")
}

pub(super) fn http_post<'js, H: Host>(
    ctx: &Ctx<'js>,
    bridge: &Bridge<H>,
) -> rquickjs::Result<Function<'js>> {
    let host = Arc::clone(&bridge.host);
    let default_timeout = bridge.http_timeout;
    Function::new(
        ctx.clone(),
        Async(
            move |ctx: Ctx<'js>,
                  url: Coerced<String>,
                  body: Opt<Value<'js>>,
                  options: Opt<Value<'js>>| {
                let host = Arc::clone(&host);
                async move {
                    let request = Body::from_guest(body.0)
                        .and_then(|body| {
                            RequestOptions::from_guest(options.0)?.into_request(
                                Method::POST,
                                &url.0,
                                body,
                                default_timeout,
                            )
                        })
                        .map_err(|e| Exception::throw_type(&ctx, &e))?;
                    dispatch(&ctx, host.as_ref(), request).await
                }
            },
        ),
    )?
    .with_name("httpPost")
}

#[cfg(test)]
mod tests {
    use rquickjs::{Context, Runtime};

    use super::*;

    #[test]
    fn options_build_query_headers_and_timeout() {
        let rt = Runtime::new().unwrap();
        let ctx = Context::full(&rt).unwrap();
        ctx.with(|ctx| {
            let options: Value<'_> = ctx
                .eval(
                    "({headers: {Authorization: 'Bearer t', 'X-Page': 2}, \
                      params: {q: 'a b', limit: 10}, timeout: 1500})",
                )
                .unwrap();
            let request = RequestOptions::from_guest(Some(options))
                .unwrap()
                .into_request(Method::GET, "https://api.example.com/items?x=1", None, None)
                .unwrap();
            assert_eq!(
                request.url.as_str(),
                "https://api.example.com/items?x=1&limit=10&q=a+b"
            );
            assert_eq!(request.headers["authorization"], "Bearer t");
            assert_eq!(request.headers["x-page"], "2");
            assert_eq!(request.timeout, Some(Duration::from_millis(1500)));
        });
    }

    #[test]
    fn json_bodies_get_a_content_type() {
        let rt = Runtime::new().unwrap();
        let ctx = Context::full(&rt).unwrap();
        ctx.with(|ctx| {
            let body: Value<'_> = ctx.eval("({hello: 'world'})").unwrap();
            let body = Body::from_guest(Some(body)).unwrap();
            let request = RequestOptions::default()
                .into_request(Method::POST, "http://localhost/echo", body, None)
                .unwrap();
            assert_eq!(request.headers[CONTENT_TYPE], "application/json");
            assert_eq!(request.body.as_deref(), Some(br#"{"hello":"world"}"#.as_slice()));

            let text: Value<'_> = ctx.eval("'raw'").unwrap();
            let body = Body::from_guest(Some(text)).unwrap().unwrap();
            assert_eq!(body.bytes, "raw");
            assert!(body.content_type.is_none());
        });
    }

    #[test]
    fn rejects_bad_urls_and_options() {
        assert!(
            RequestOptions::default()
                .into_request(Method::GET, "file:///etc/passwd", None, None)
                .is_err()
        );
        assert!(
            RequestOptions::default()
                .into_request(Method::GET, "not a url", None, None)
                .is_err()
        );

        let rt = Runtime::new().unwrap();
        let ctx = Context::full(&rt).unwrap();
        ctx.with(|ctx| {
            for src in ["5", "({timeout: -1})", "({headers: 'x'})", "({params: {a: [1]}})"] {
                let options: Value<'_> = ctx.eval(src).unwrap();
                assert!(RequestOptions::from_guest(Some(options)).is_err(), "{src}");
            }
        });
    }
}
