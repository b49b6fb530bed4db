//! REST client against a mock server

use std::time::Duration;

use serde::Deserialize;
use shelfsync_client::{ClientError, GovernedClient, RestClient};
use shelfsync_governor::RequestContext;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{recovering_governor, setup_rest, test_governor, TEST_TOKEN};

#[derive(Debug, Deserialize, PartialEq)]
struct Library {
    id: String,
    name: String,
}

#[tokio::test]
async fn test_get_json_success() {
    let (server, client) = setup_rest().await;
    Mock::given(method("GET"))
        .and(path("/api/libraries/lib-1"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "lib-1",
            "name": "Audiobooks"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let library: Library = client
        .get_json("/libraries/lib-1", &RequestContext::new())
        .await
        .unwrap();

    assert_eq!(library.name, "Audiobooks");
    let metrics = client.governor().get_metrics();
    assert_eq!(metrics.requests, 1);
    assert_eq!(metrics.rate_limited, 0);
    assert_eq!(client.governor().in_flight(), 0);
}

#[tokio::test]
async fn test_post_json_sends_body() {
    let (server, client) = setup_rest().await;
    Mock::given(method("POST"))
        .and(path("/api/items/batch/get"))
        .and(body_json(serde_json::json!({"libraryItemIds": ["a", "b"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "lib-1",
            "name": "Books"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let body = serde_json::json!({"libraryItemIds": ["a", "b"]});
    let library: Library = client
        .post_json("/items/batch/get", &body, &RequestContext::new())
        .await
        .unwrap();
    assert_eq!(library.id, "lib-1");
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let (server, client) = setup_rest().await;
    Mock::given(method("GET"))
        .and(path("/api/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such item"))
        .mount(&server)
        .await;

    let err = client
        .get_json::<Library>("/missing", &RequestContext::new())
        .await
        .unwrap_err();

    match err {
        ClientError::Status { status, body } => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(body, "no such item");
        }
        other => panic!("expected Status, got {other:?}"),
    }
    assert_eq!(client.governor().get_metrics().rate_limited, 0);
}

#[tokio::test]
async fn test_malformed_json_is_invalid_response() {
    let (server, client) = setup_rest().await;
    Mock::given(method("GET"))
        .and(path("/api/libraries"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client
        .get_json::<Library>("/libraries", &RequestContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_429_is_retried_after_governor_backoff() {
    let (server, client) = setup_rest().await;
    Mock::given(method("GET"))
        .and(path("/api/libraries/lib-1"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/libraries/lib-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "lib-1",
            "name": "Audiobooks"
        })))
        .mount(&server)
        .await;

    let library: Library = client
        .get_json("/libraries/lib-1", &RequestContext::new())
        .await
        .unwrap();
    assert_eq!(library.id, "lib-1");

    let metrics = client.governor().get_metrics();
    assert_eq!(metrics.requests, 3);
    assert_eq!(metrics.rate_limited, 2);
    assert_eq!(metrics.retry_after_count, 0);
    assert!(metrics.current_rate > Duration::from_millis(10));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
}

#[tokio::test]
async fn test_rate_recovers_after_healthy_responses() {
    let server = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/libraries/lib-1"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/libraries/lib-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "lib-1",
            "name": "Audiobooks"
        })))
        .mount(&server)
        .await;

    let client = RestClient::new(format!("{}/api", server.uri()), recovering_governor(5))
        .with_token(TEST_TOKEN);
    let ctx = RequestContext::new();

    // The 429 is retried; the retry is the first healthy response
    let _: Library = client.get_json("/libraries/lib-1", &ctx).await.unwrap();
    let slowed = client.governor().get_rate();
    assert!(slowed > client.governor().min_rate());

    for _ in 0..3 {
        let _: Library = client.get_json("/libraries/lib-1", &ctx).await.unwrap();
    }
    assert_eq!(client.governor().get_rate(), slowed);

    let _: Library = client.get_json("/libraries/lib-1", &ctx).await.unwrap();
    let governor = client.governor();
    assert_eq!(governor.get_rate(), governor.min_rate());
    assert_eq!(governor.get_metrics().rate_limited, 1);
    assert_eq!(governor.get_metrics().requests, 6);
}

#[tokio::test]
async fn test_429_retry_limit_is_respected() {
    let server = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/busy"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let inner = GovernedClient::new(format!("{}/api", server.uri()), test_governor())
        .with_max_retries(1);
    let err = inner
        .execute_with_retry(
            || inner.request(reqwest::Method::GET, "/busy"),
            &RequestContext::new(),
        )
        .await
        .unwrap_err();

    assert!(err.is_rate_limited());
    assert_eq!(inner.governor().get_metrics().rate_limited, 2);
}

#[tokio::test]
async fn test_retry_after_is_surfaced_and_counted() {
    let server = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let inner = GovernedClient::new(format!("{}/api", server.uri()), test_governor())
        .with_max_retries(0);
    let err = inner
        .execute(inner.request(reqwest::Method::GET, "/busy"), &RequestContext::new())
        .await
        .unwrap_err();

    match err {
        // 7s padded by the 1.1 parse buffer
        ClientError::TooManyRequests { retry_after } => {
            assert_eq!(retry_after.as_millis(), 7700);
        }
        other => panic!("expected TooManyRequests, got {other:?}"),
    }

    let governor = inner.governor();
    assert_eq!(governor.get_metrics().retry_after_count, 1);
    assert!(governor.backoff_remaining().is_some());
    assert_eq!(governor.get_rate(), governor.max_rate());
}

#[tokio::test]
async fn test_low_quota_headers_slow_the_client() {
    let (server, client) = setup_rest().await;
    Mock::given(method("GET"))
        .and(path("/api/libraries/lib-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-RateLimit-Limit", "100")
                .insert_header("X-RateLimit-Remaining", "10")
                .set_body_json(serde_json::json!({"id": "lib-1", "name": "Audiobooks"})),
        )
        .mount(&server)
        .await;

    let _: Library = client
        .get_json("/libraries/lib-1", &RequestContext::new())
        .await
        .unwrap();

    let metrics = client.governor().get_metrics();
    assert_eq!(metrics.rate_limited, 1);
    assert!(metrics.current_rate > Duration::from_millis(10));
}

#[tokio::test]
async fn test_separate_clients_have_separate_governors() {
    let (_server_a, a) = setup_rest().await;
    let (_server_b, b) = setup_rest().await;

    a.governor().observe_rate_limit(Duration::ZERO);
    assert!(a.governor().get_rate() > b.governor().get_rate());

    let shared = RestClient::new("http://localhost", b.governor().clone());
    assert_eq!(shared.governor().get_rate(), b.governor().get_rate());
}
