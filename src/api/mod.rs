pub mod health;
pub mod history;
pub mod preview;
pub mod session;

use axum::Router;
use axum::routing::{get, post};

use crate::AppState;

/// Build the full API router.
///
/// Route layout:
/// ```text
/// /health              GET
/// /api/generate        POST   (text/event-stream)
/// /api/modify          POST   (text/event-stream)
/// /api/preview         POST   (text/html)
/// /api/history         GET, DELETE
/// /api/history/:id     GET, DELETE
/// ```
pub fn build_api_router() -> Router<AppState> {
    let api_routes = Router::new()
        .route("/generate", post(session::generate))
        .route("/modify", post(session::modify))
        .route("/preview", post(preview::render_preview))
        .route(
            "/history",
            get(history::list_history).delete(history::clear_history),
        )
        .route(
            "/history/{id}",
            get(history::get_history).delete(history::delete_history),
        );

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api_routes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request as HttpRequest, StatusCode, header};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::history::InMemoryHistory;
    use crate::session::fake::{Reply, ScriptedBackend, chunks, sse_body};
    use crate::upstream::UpstreamError;

    fn test_app(replies: Vec<Reply>) -> (AppState, Router) {
        let state = AppState {
            config: Arc::new(Config::default()),
            backend: ScriptedBackend::new(replies),
            history: Arc::new(InMemoryHistory::new()),
        };
        let app = build_api_router().with_state(state.clone());
        (state, app)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// JSON payloads of the SSE events in a response body.
    fn sse_events(body: &str) -> Vec<serde_json::Value> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_health_route() {
        let (_, app) = test_app(vec![]);
        let req = HttpRequest::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn test_generate_streams_session_events() {
        let body = sse_body(&["```html\n<p>Hi</p>\n```\n", "```css\nbody{color:red}\n```"]);
        let (state, app) = test_app(vec![Reply::Sse(chunks(&body, 4))]);

        let resp = app
            .oneshot(post_json("/api/generate", serde_json::json!({ "prompt": "a page" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let text = body_text(resp).await;
        assert!(text.contains("event: started"));
        assert!(text.contains("event: update"));
        let events = sse_events(&text);
        let last = events.last().unwrap();
        assert_eq!(last["event"], "completed");
        assert!(last["artifact"]["html"].as_str().unwrap().contains("<p>Hi</p>"));
        assert_eq!(last["warning"]["kind"], "partial_content");
        assert_eq!(last["warning"]["missing"], serde_json::json!(["js"]));

        assert_eq!(state.history.len().await, 1);
    }

    #[tokio::test]
    async fn test_generate_failure_is_an_event() {
        let (_, app) = test_app(vec![Reply::Fail(UpstreamError::RateLimited { retry_after: None })]);
        let resp = app
            .oneshot(post_json("/api/generate", serde_json::json!({ "prompt": "a page" })))
            .await
            .unwrap();
        let events = sse_events(&body_text(resp).await);
        let last = events.last().unwrap();
        assert_eq!(last["event"], "failed");
        assert_eq!(last["kind"], "rate_limited");
        assert!(last["message"].as_str().unwrap().contains("high demand"));
    }

    #[tokio::test]
    async fn test_generate_rejects_blank_prompt() {
        let (_, app) = test_app(vec![]);
        let resp = app
            .oneshot(post_json("/api/generate", serde_json::json!({ "prompt": "  " })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn test_generate_rejects_malformed_json() {
        let (_, app) = test_app(vec![]);
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/api/generate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_modify_requires_instruction() {
        let (_, app) = test_app(vec![]);
        let resp = app
            .oneshot(post_json(
                "/api/modify",
                serde_json::json!({ "html": "<p>x</p>", "css": "", "js": "", "instruction": "" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_modify_streams_session_events() {
        let body = sse_body(&["```javascript\nalert('hi')\n```"]);
        let (_, app) = test_app(vec![Reply::Sse(chunks(&body, 2))]);
        let resp = app
            .oneshot(post_json(
                "/api/modify",
                serde_json::json!({ "html": "<p>x</p>", "instruction": "greet" }),
            ))
            .await
            .unwrap();

        let events = sse_events(&body_text(resp).await);
        assert_eq!(events[0]["mode"], "modify");
        let last = events.last().unwrap();
        assert_eq!(last["event"], "completed");
        assert_eq!(last["artifact"]["html"], "<p>x</p>");
        assert!(last["artifact"]["js"].as_str().unwrap().contains("alert('hi')"));
    }

    #[tokio::test]
    async fn test_preview_route_returns_html() {
        let (_, app) = test_app(vec![]);
        let resp = app
            .oneshot(post_json(
                "/api/preview",
                serde_json::json!({ "html": "<a href=\"http://example.com\">x</a>", "css": "", "js": "" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()
                .get(header::CONTENT_TYPE)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
        let text = body_text(resp).await;
        assert!(text.contains("<a href=\"http://example.com\">x</a>"));
        assert!(text.contains("addEventListener(\"click\""));
    }

    #[tokio::test]
    async fn test_history_routes() {
        let body = sse_body(&["```html\n<p>saved</p>\n```"]);
        let (state, app) = test_app(vec![Reply::Sse(chunks(&body, 1))]);
        let resp = app
            .clone()
            .oneshot(post_json("/api/generate", serde_json::json!({ "prompt": "keep" })))
            .await
            .unwrap();
        body_text(resp).await;

        let record = state.history.list().await.remove(0);
        let req = HttpRequest::builder()
            .uri(format!("/api/history/{}", record.id))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["prompt"], "keep");

        let req = HttpRequest::builder()
            .method("DELETE")
            .uri(format!("/api/history/{}", record.id))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = HttpRequest::builder()
            .uri(format!("/api/history/{}", record.id))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
