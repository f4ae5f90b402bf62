//! HTTP transport behavior against a local mock server

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rotor::clock::SystemClock;
use rotor::dispatch::{
    DispatchConfig, Dispatcher, HttpUpstream, Upstream, UpstreamConfig, UpstreamRequest,
};
use rotor::keys::{KeyPool, KeyPoolConfig, RateLimitConfig, RateLimiter};
use rotor::proxies::ProxyPool;
use rotor::{KeyStatus, RotorError};

fn upstream_for(server: &MockServer) -> HttpUpstream {
    HttpUpstream::new(UpstreamConfig {
        base_url: server.uri(),
        auth_header: "x-api-key".to_string(),
        connect_timeout: Duration::from_secs(2),
    })
}

#[tokio::test]
async fn test_sends_credential_in_configured_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("x-api-key", "sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let upstream = upstream_for(&server);
    let response = upstream
        .send(&UpstreamRequest::get("/v1/models"), "sk-test", None)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_ref(), b"ok");
}

#[tokio::test]
async fn test_path_joining_tolerates_slash_variants() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/ping"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = UpstreamConfig {
        base_url: format!("{}/", server.uri()),
        auth_header: "x-api-key".to_string(),
        connect_timeout: Duration::from_secs(2),
    };
    let upstream = HttpUpstream::new(config.clone());
    upstream
        .send(&UpstreamRequest::get("/v1/ping"), "k", None)
        .await
        .unwrap();

    config.base_url = server.uri();
    let upstream = HttpUpstream::new(config);
    upstream
        .send(&UpstreamRequest::get("v1/ping"), "k", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_post_carries_body_and_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat"))
        .and(header("content-type", "application/json"))
        .and(body_string(r#"{"q":1}"#))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let upstream = upstream_for(&server);
    let response = upstream
        .send(
            &UpstreamRequest::post_json("/v1/chat", r#"{"q":1}"#),
            "sk-test",
            None,
        )
        .await
        .unwrap();
    assert_eq!(response.status, 201);
}

#[tokio::test]
async fn test_non_success_status_is_a_response_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/ping"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let upstream = upstream_for(&server);
    let response = upstream
        .send(&UpstreamRequest::get("/v1/ping"), "sk-test", None)
        .await
        .unwrap();

    assert_eq!(response.status, 503);
    assert!(!response.is_success());
    assert_eq!(response.body.as_ref(), b"overloaded");
}

#[tokio::test]
async fn test_unreachable_host_is_a_network_error() {
    // TEST-NET-1 address, nothing listens there.
    let upstream = HttpUpstream::new(UpstreamConfig {
        base_url: "http://192.0.2.1:9".to_string(),
        auth_header: "x-api-key".to_string(),
        connect_timeout: Duration::from_millis(200),
    });

    let err = upstream
        .send(&UpstreamRequest::get("/v1/ping"), "sk-test", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RotorError::Network(_) | RotorError::Timeout
    ));
}

#[tokio::test]
async fn test_dispatcher_rotates_over_live_transport() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/ping"))
        .and(header("x-api-key", "sk-revoked-0001"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/ping"))
        .and(header("x-api-key", "sk-current-0002"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let clock = Arc::new(SystemClock);
    let keys = Arc::new(KeyPool::new(
        vec!["sk-revoked-0001".to_string(), "sk-current-0002".to_string()],
        clock.clone(),
        KeyPoolConfig::default(),
    ));
    let dispatcher = Dispatcher::new(
        keys.clone(),
        Arc::new(ProxyPool::new(clock.clone(), 3)),
        Arc::new(RateLimiter::new(RateLimitConfig::default(), clock)),
        Arc::new(upstream_for(&server)),
        DispatchConfig {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(5),
            proxy_enabled: false,
        },
        None,
    );

    let outcome = dispatcher
        .dispatch(UpstreamRequest::get("/v1/ping"))
        .await
        .unwrap();
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.response.body.as_ref(), b"pong");

    // The 401 disabled the first credential.
    let summaries = keys.list();
    assert_eq!(summaries[0].status, KeyStatus::Disabled);
    assert_eq!(summaries[1].status, KeyStatus::Active);
}
