use super::*;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn url_for(server: &MockServer, route: &str) -> Url {
    Url::parse(&server.uri())
        .and_then(|base| base.join(route))
        .expect("mock server url should parse")
}

#[test]
fn transport_configuration() {
    let transport = HttpTransport::from_config(&HttpConfig::default());
    assert_eq!(transport.retry_attempts, 1);

    let transport = HttpTransport::new(Duration::from_secs(5), 0);
    assert_eq!(transport.retry_attempts, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn post_json_sends_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .and(header("x-api-key", "secret"))
        .and(body_json(json!({"hello": "world"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(Duration::from_secs(5), 1);
    let body = transport
        .post_json(
            &url_for(&server, "/echo"),
            &[("x-api-key", "secret")],
            &json!({"hello": "world"}),
        )
        .expect("request should succeed");

    assert_eq!(body, "ok");
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(Duration::from_secs(5), 3);
    let result = transport.get_text(&url_for(&server, "/missing"), &[]);

    let error = result.expect_err("404 should fail");
    assert!(error.to_string().contains("404"));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_retried_until_attempts_run_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(Duration::from_secs(5), 2);
    let result = transport.get_text(&url_for(&server, "/flaky"), &[]);

    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn single_attempt_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::from_config(&HttpConfig::default());
    assert!(transport.get_text(&url_for(&server, "/down"), &[]).is_err());
}
