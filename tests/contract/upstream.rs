use futures::StreamExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zensite::upstream::{CompletionBackend, DeltaStream, UpstreamError, prompt};

use crate::common::{self, COMPLETIONS_PATH};

async fn collect(stream: DeltaStream) -> String {
    stream
        .map(|delta| delta.unwrap())
        .collect::<Vec<_>>()
        .await
        .concat()
}

#[tokio::test]
async fn test_429_on_every_key_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let client = common::client(&server, &["key-1", "key-2", "key-3"]);
    let result = client.stream(&prompt::text_generation("a page")).await;

    assert!(matches!(result, Err(UpstreamError::RateLimited { .. })));
    assert_eq!(client.rotation().cursor(), 0);
}

#[tokio::test]
async fn test_keys_ending_in_429_are_rate_limited_despite_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "model": "model-a" })))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "model": "model-b" })))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let client = common::client(&server, &["key-1", "key-2"]);
    let err = client.complete(&prompt::text_generation("a page")).await.unwrap_err();
    assert!(matches!(err, UpstreamError::RateLimited { .. }));
}

#[tokio::test]
async fn test_mixed_failures_surface_last_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer key-1"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer key-2"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(2)
        .mount(&server)
        .await;

    let client = common::client(&server, &["key-1", "key-2"]);
    let err = client.complete(&prompt::text_generation("a page")).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Api { status: 502, .. }));
}

#[tokio::test]
async fn test_rate_limited_key_falls_back_to_next_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer key-1"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer key-2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(common::sse_body(&["Hel", "lo"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = common::client(&server, &["key-1", "key-2", "key-3"]);
    let stream = client.stream(&prompt::text_generation("a page")).await.unwrap();

    assert_eq!(collect(stream).await, "Hello");
    assert_eq!(client.rotation().cursor(), 2);
}

#[tokio::test]
async fn test_next_request_starts_after_last_successful_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer key-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::json_completion("one")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer key-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::json_completion("two")))
        .expect(1)
        .mount(&server)
        .await;

    let client = common::client(&server, &["key-1", "key-2"]);
    let request = prompt::text_generation("a page");
    assert_eq!(client.complete(&request).await.unwrap(), "one");
    assert_eq!(client.complete(&request).await.unwrap(), "two");
    assert_eq!(client.rotation().cursor(), 0);
}

#[tokio::test]
async fn test_server_error_falls_back_to_next_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "model": "model-a" })))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal details"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "model": "model-b" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::json_completion("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let client = common::client(&server, &["key-1"]);
    let content = client.complete(&prompt::text_generation("a page")).await.unwrap();
    assert_eq!(content, "ok");
}

#[tokio::test]
async fn test_all_models_failing_surfaces_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .expect(2)
        .mount(&server)
        .await;

    let client = common::client(&server, &["key-1"]);
    let err = client.complete(&prompt::text_generation("a page")).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Api { status: 503, .. }));
}

#[tokio::test]
async fn test_single_response_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(header("authorization", "Bearer key-1"))
        .and(header("x-title", "Zensite"))
        .and(body_partial_json(serde_json::json!({
            "model": "model-a",
            "stream": false,
            "max_tokens": 12000,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::json_completion("```html\nHi\n```")))
        .expect(1)
        .mount(&server)
        .await;

    let client = common::client(&server, &["key-1"]);
    let content = client.complete(&prompt::text_generation("a page")).await.unwrap();
    assert_eq!(content, "```html\nHi\n```");
}

#[tokio::test]
async fn test_error_envelope_in_200_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "error": { "message": "Rate limit exceeded: free-models-per-day", "code": 429 }
        })))
        .mount(&server)
        .await;

    let client = common::client(&server, &["key-1", "key-2"]);
    let err = client.complete(&prompt::text_generation("a page")).await.unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn test_rate_limit_is_retried_on_same_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer key-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::json_completion("after retry")))
        .expect(1)
        .mount(&server)
        .await;

    let client = common::retrying_client(&server, &["key-1"]);
    let content = client.complete(&prompt::text_generation("a page")).await.unwrap();
    assert_eq!(content, "after retry");
}

#[tokio::test]
async fn test_image_request_falls_back_to_text_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "model": "vision-a" })))
        .respond_with(ResponseTemplate::new(400).set_body_string("image too large"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "model": "model-a" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::json_completion("text only")))
        .expect(1)
        .mount(&server)
        .await;

    let client = common::client(&server, &["key-1"]);
    let request = prompt::image_generation("data:image/png;base64,iVBORw0KGgo=", None);
    let content = client.complete(&request).await.unwrap();
    assert_eq!(content, "text only");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    let vision: serde_json::Value = received[0].body_json().unwrap();
    assert_eq!(vision["max_tokens"], 8000);
    assert_eq!(vision["messages"][0]["content"][1]["type"], "image_url");
    let fallback: serde_json::Value = received[1].body_json().unwrap();
    assert_eq!(fallback["messages"][0]["role"], "system");
    assert!(fallback["messages"][1]["content"].is_string());
}
