use std::sync::Arc;

use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zensite::artifact::{SectionKind, SiteArtifact};
use zensite::error::{GenerationError, HIGH_DEMAND_MESSAGE, SessionWarning};
use zensite::history::InMemoryHistory;
use zensite::session::{
    GenerationRequest, ModificationRequest, Orchestrator, OrchestratorOptions, SessionEvent,
    SessionState,
};
use zensite::upstream::Transport;

use crate::common;

fn orchestrator(client: zensite::upstream::CompletionClient) -> Orchestrator {
    Orchestrator::new(Arc::new(client), OrchestratorOptions::default())
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_streamed_generation_end_to_end() {
    let server = MockServer::start().await;
    let body = common::sse_body(&[
        "Here you go:\n```ht",
        "ml\n<h1>Shop</h1>\n```\n```css\nbody{color:red}\n```\n",
        "```javascript\nconsole.log(1)\n```",
    ]);
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let history = Arc::new(InMemoryHistory::new());
    let orchestrator = orchestrator(common::client(&server, &["key-1"])).with_history(history.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = orchestrator
        .generate(GenerationRequest::text("an online shop"), &tx)
        .await
        .unwrap();

    assert!(outcome.artifact.html.starts_with("<!DOCTYPE html>"));
    assert!(outcome.artifact.html.contains("<h1>Shop</h1>"));
    assert!(outcome.artifact.css.contains("body{color:red}"));
    assert!(outcome.artifact.js.contains("console.log(1)"));
    assert_eq!(outcome.warning, None);
    assert_eq!(orchestrator.state(), SessionState::Success);

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(SessionEvent::Started { .. })));
    assert!(matches!(events.last(), Some(SessionEvent::Completed { .. })));

    let stored = history.list().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].prompt, "an online shop");
}

#[tokio::test]
async fn test_rate_limited_everywhere_fails_with_high_demand() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let orchestrator = orchestrator(common::client(&server, &["key-1", "key-2"]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let err = orchestrator
        .generate(GenerationRequest::text("a page"), &tx)
        .await
        .unwrap_err();

    assert_eq!(err, GenerationError::RateLimited);
    assert_eq!(orchestrator.state(), SessionState::Failed);
    match drain(&mut rx).last() {
        Some(SessionEvent::Failed { message, .. }) => assert_eq!(message, HIGH_DEMAND_MESSAGE),
        other => panic!("unexpected final event: {other:?}"),
    }
}

#[tokio::test]
async fn test_truncated_stream_is_partial_success() {
    let server = MockServer::start().await;
    let body = common::sse_body(&["```html\n<main>\n<h1>Cut", " short"]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let orchestrator = orchestrator(common::client(&server, &["key-1"]));
    let (tx, _rx) = mpsc::unbounded_channel();

    let outcome = orchestrator
        .generate(GenerationRequest::text("a page"), &tx)
        .await
        .unwrap();

    assert!(outcome.artifact.html.contains("<h1>Cut short"));
    assert_eq!(
        outcome.warning,
        Some(SessionWarning::PartialContent {
            missing: vec![SectionKind::Css, SectionKind::Js]
        })
    );
}

#[tokio::test]
async fn test_single_response_modification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::json_completion(
            "```css\nbody{background:#000}\n```",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator(common::client(&server, &["key-1"]));
    let (tx, _rx) = mpsc::unbounded_channel();
    let current = SiteArtifact::from_parts("<p>hello</p>", "body{}", "");

    let outcome = orchestrator
        .modify_with(
            ModificationRequest::new(current, "make it dark"),
            Transport::Single,
            &tx,
        )
        .await
        .unwrap();

    assert_eq!(outcome.artifact.html, "<p>hello</p>");
    assert!(outcome.artifact.css.contains("body{background:#000}"));
    assert_eq!(
        outcome.warning,
        Some(SessionWarning::Unchanged {
            unchanged: vec![SectionKind::Html, SectionKind::Js]
        })
    );
    assert!(!outcome.warning.unwrap().message().contains("missing"));

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = received[0].body_json().unwrap();
    let prompt = body["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.contains("<p>hello</p>"));
    assert!(prompt.contains("make it dark"));
}
