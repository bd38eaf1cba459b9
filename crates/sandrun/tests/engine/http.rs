use anyhow::Result;
use sandrun::{Credentials, ErrorKind, RunConfig, ScriptSource};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path, query_param},
};

use super::common::engine;

fn with_base(server: &MockServer) -> Credentials {
    Credentials::new()
        .with("baseUrl", server.uri())
        .with("apiKey", "k-123")
}

#[tokio::test]
async fn http_get_sends_headers_and_params() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/accounts"))
        .and(query_param("page", "2"))
        .and(header("authorization", "Bearer k-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accounts": [{"id": 7}]})))
        .expect(1)
        .mount(&server)
        .await;

    let value = engine()?
        .execute(
            &ScriptSource::inline(
                "async function run(c) {
                    const body = await httpGet(c.baseUrl + '/v1/accounts', {
                        headers: { Authorization: 'Bearer ' + c.apiKey },
                        params: { page: 2 },
                    });
                    return body.accounts.map((a) => a.id);
                }",
            ),
            &with_base(&server),
            &RunConfig::default(),
        )
        .await?;

    assert_eq!(value, json!([7]));
    Ok(())
}

#[tokio::test]
async fn http_post_sends_json() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"grant": "client", "key": "k-123"})))
        .respond_with(ResponseTemplate::new(201).set_body_string("issued"))
        .expect(1)
        .mount(&server)
        .await;

    let result = engine()?
        .run(
            &ScriptSource::inline(
                "async function run(c) {
                    const text = await httpPost(c.baseUrl + '/token', { grant: 'client', key: c.apiKey });
                    return { success: true, data: text };
                }",
            ),
            &with_base(&server),
            &RunConfig::default(),
        )
        .await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.data, Some(json!("issued")));
    Ok(())
}

#[tokio::test]
async fn error_status_fails_the_run() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal stack trace"))
        .mount(&server)
        .await;

    let err = engine()?
        .execute(
            &ScriptSource::inline("async function run(c) { return await httpGet(c.baseUrl + '/x'); }"),
            &with_base(&server),
            &RunConfig::default(),
        )
        .await
        .expect_err("500 should reject");

    assert_eq!(err.kind(), ErrorKind::CapabilityFailure);
    let message = err.to_string();
    assert!(message.ends_with("Request failed with status code 500"), "{message}");
    assert!(!message.contains("stack trace"), "{message}");
    Ok(())
}

#[tokio::test]
async fn guest_can_catch_capability_errors() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let value = engine()?
        .execute(
            &ScriptSource::inline(
                "async function run(c) {
                    try {
                        await httpGet(c.baseUrl + '/missing');
                        return 'unreachable';
                    } catch (e) {
                        return { name: e.name, message: e.message, isError: e instanceof Error };
                    }
                }",
            ),
            &with_base(&server),
            &RunConfig::default(),
        )
        .await?;

    assert_eq!(
        value,
        json!({
            "name": "CapabilityError",
            "message": "Request failed with status code 404",
            "isError": true,
        })
    );
    Ok(())
}

#[tokio::test]
async fn non_http_urls_are_rejected_before_dispatch() -> Result<()> {
    let err = engine()?
        .execute(
            &ScriptSource::inline("async function run() { return await httpGet('file:///etc/passwd'); }"),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await
        .expect_err("file urls are not allowed");

    assert_eq!(err.kind(), ErrorKind::GuestError);
    assert!(err.to_string().contains("TypeError: unsupported URL scheme 'file'"), "{err}");
    Ok(())
}

#[tokio::test]
async fn rethrown_capability_error_keeps_host_message() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = engine()?
        .execute(
            &ScriptSource::inline(
                "async function run(c) {
                    try {
                        await httpGet(c.baseUrl + '/busy');
                    } catch (e) {
                        e.message = 'rewritten by guest';
                        throw e;
                    }
                }",
            ),
            &with_base(&server),
            &RunConfig::default(),
        )
        .await
        .expect_err("503 should reject");

    assert_eq!(err.kind(), ErrorKind::CapabilityFailure);
    assert!(err.to_string().ends_with("Request failed with status code 503"), "{err}");
    Ok(())
}

#[tokio::test]
async fn guest_cannot_impersonate_capability_errors() -> Result<()> {
    let err = engine()?
        .execute(
            &ScriptSource::inline(
                "function run() {
                    const e = new Error('upstream down');
                    e.name = 'CapabilityError';
                    throw e;
                }",
            ),
            &Credentials::new(),
            &RunConfig::default(),
        )
        .await
        .expect_err("guest throw should fail the run");

    assert_eq!(err.kind(), ErrorKind::GuestError);
    assert!(err.to_string().ends_with("CapabilityError: upstream down"), "{err}");
    Ok(())
}
