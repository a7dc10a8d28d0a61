use std::time::Duration;

use wiremock::MockServer;
use zensite::config::{StreamConfig, UpstreamConfig};
use zensite::upstream::{CompletionClient, RetryPolicy};

pub const COMPLETIONS_PATH: &str = "/api/v1/chat/completions";

pub fn upstream_config(server: &MockServer, keys: &[&str]) -> UpstreamConfig {
    UpstreamConfig {
        base_url: format!("{}/api/v1", server.uri()),
        api_keys: keys.iter().map(|k| k.to_string()).collect(),
        text_models: vec!["model-a".into(), "model-b".into()],
        vision_models: vec!["vision-a".into()],
        ..UpstreamConfig::default()
    }
}

pub fn client(server: &MockServer, keys: &[&str]) -> CompletionClient {
    CompletionClient::new(
        upstream_config(server, keys),
        RetryPolicy::disabled(),
        &StreamConfig::default(),
    )
    .unwrap()
}

/// Client that retries rate limits once without waiting long.
pub fn retrying_client(server: &MockServer, keys: &[&str]) -> CompletionClient {
    let retry = RetryPolicy::new()
        .with_max_retries(1)
        .with_initial_backoff(Duration::from_millis(5))
        .with_max_backoff(Duration::from_millis(10));
    CompletionClient::new(upstream_config(server, keys), retry, &StreamConfig::default()).unwrap()
}

/// SSE body delivering `deltas` followed by `[DONE]`.
pub fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::from(": OPENROUTER PROCESSING\n\n");
    for delta in deltas {
        let frame = serde_json::json!({ "choices": [{ "delta": { "content": delta } }] });
        body.push_str(&format!("data: {frame}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

pub fn json_completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "gen-1",
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    })
}
