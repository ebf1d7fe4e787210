use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::AppState;
use super::handlers::{agent_card_handler, jsonrpc_handler, subscribe_handler};
use crate::credentials::{API_KEY_HEADER, AUTHORIZATION_HEADER};
use crate::discovery::WELL_KNOWN_PATH;

pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024; // 1 MiB

/// Credential inbound requests must present.
#[derive(Clone, Default)]
pub enum InboundAuth {
    #[default]
    Open,
    /// `X-Api-Key: <key>`
    ApiKey(String),
    /// `Authorization: Bearer <token>`
    Bearer(String),
}

impl std::fmt::Debug for InboundAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Open => "Open",
            Self::ApiKey(_) => "ApiKey([REDACTED])",
            Self::Bearer(_) => "Bearer([REDACTED])",
        })
    }
}

pub fn build_router(state: AppState, auth: InboundAuth, max_body_size: usize) -> Router {
    let protected = Router::new()
        .route("/a2a", post(jsonrpc_handler))
        .route("/a2a/tasks/{id}/subscribe", get(subscribe_handler))
        .layer(middleware::from_fn_with_state(auth, auth_middleware))
        .layer(RequestBodyLimitLayer::new(max_body_size));

    Router::new()
        .route(WELL_KNOWN_PATH, get(agent_card_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn matches_secret(presented: Option<&str>, expected: &str) -> bool {
    let presented = presented.unwrap_or("");
    presented.len() == expected.len() && bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

async fn auth_middleware(State(auth): State<InboundAuth>, req: Request<Body>, next: Next) -> Response {
    let allowed = {
        let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

        match &auth {
            InboundAuth::Open => true,
            InboundAuth::ApiKey(expected) => matches_secret(header(API_KEY_HEADER), expected),
            InboundAuth::Bearer(expected) => matches_secret(
                header(AUTHORIZATION_HEADER).and_then(|v| v.strip_prefix("Bearer ")),
                expected,
            ),
        }
    };

    if !allowed {
        tracing::debug!(path = %req.uri().path(), "rejected unauthenticated request");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::server::testing::test_state;

    fn rpc_request() -> axum::http::request::Builder {
        axum::http::Request::builder()
            .method("POST")
            .uri("/a2a")
            .header("content-type", "application/json")
    }

    fn body() -> Body {
        Body::from(
            serde_json::to_vec(&serde_json::json!({
                "jsonrpc": "2.0", "id": "1",
                "method": "tasks/get", "params": {"id": "x"}
            }))
            .unwrap(),
        )
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn open_router_serves_requests() {
        let app = build_router(test_state(), InboundAuth::Open, DEFAULT_MAX_BODY_SIZE);
        let resp = app.oneshot(rpc_request().body(body()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json = json_body(resp).await;
        assert_eq!(json["error"]["code"], -32001);
    }

    #[tokio::test]
    async fn api_key_accepted() {
        let app = build_router(
            test_state(),
            InboundAuth::ApiKey("k-123".into()),
            DEFAULT_MAX_BODY_SIZE,
        );
        let req = rpc_request()
            .header("x-api-key", "k-123")
            .body(body())
            .unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), 200);
    }

    #[tokio::test]
    async fn api_key_rejected() {
        let app = build_router(
            test_state(),
            InboundAuth::ApiKey("k-123".into()),
            DEFAULT_MAX_BODY_SIZE,
        );
        let missing = rpc_request().body(body()).unwrap();
        assert_eq!(app.clone().oneshot(missing).await.unwrap().status(), 401);

        let wrong = rpc_request()
            .header("x-api-key", "k-124")
            .body(body())
            .unwrap();
        assert_eq!(app.oneshot(wrong).await.unwrap().status(), 401);
    }

    #[tokio::test]
    async fn bearer_token() {
        let app = build_router(
            test_state(),
            InboundAuth::Bearer("secret-token".into()),
            DEFAULT_MAX_BODY_SIZE,
        );
        let ok = rpc_request()
            .header("authorization", "Bearer secret-token")
            .body(body())
            .unwrap();
        assert_eq!(app.clone().oneshot(ok).await.unwrap().status(), 200);

        let prefix_only = rpc_request()
            .header("authorization", "Bearer ")
            .body(body())
            .unwrap();
        assert_eq!(app.clone().oneshot(prefix_only).await.unwrap().status(), 401);

        let basic = rpc_request()
            .header("authorization", "Basic c2VjcmV0")
            .body(body())
            .unwrap();
        assert_eq!(app.oneshot(basic).await.unwrap().status(), 401);
    }

    #[tokio::test]
    async fn agent_card_skips_auth() {
        let app = build_router(
            test_state(),
            InboundAuth::Bearer("secret-token".into()),
            DEFAULT_MAX_BODY_SIZE,
        );
        let req = axum::http::Request::builder()
            .uri(WELL_KNOWN_PATH)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json = json_body(resp).await;
        assert_eq!(json["name"], "test-agent");
    }

    #[tokio::test]
    async fn subscribe_route_requires_auth() {
        let app = build_router(
            test_state(),
            InboundAuth::ApiKey("k".into()),
            DEFAULT_MAX_BODY_SIZE,
        );
        let req = axum::http::Request::builder()
            .uri("/a2a/tasks/x/subscribe")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), 401);
    }

    #[tokio::test]
    async fn subscribe_route_unknown_task() {
        let app = build_router(test_state(), InboundAuth::Open, DEFAULT_MAX_BODY_SIZE);
        let req = axum::http::Request::builder()
            .uri("/a2a/tasks/missing/subscribe")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let json = json_body(resp).await;
        assert_eq!(json["error"]["code"], -32001);
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let app = build_router(test_state(), InboundAuth::Open, DEFAULT_MAX_BODY_SIZE);
        let req = rpc_request().body(Body::from("{oops")).unwrap();
        let json = json_body(app.oneshot(req).await.unwrap()).await;
        assert_eq!(json["error"]["code"], -32700);
        assert!(json["id"].is_null());
    }

    #[tokio::test]
    async fn body_size_limit() {
        let app = build_router(test_state(), InboundAuth::Open, DEFAULT_MAX_BODY_SIZE);
        let oversized = vec![b'a'; DEFAULT_MAX_BODY_SIZE + 1];
        let req = rpc_request().body(Body::from(oversized)).unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), 413);
    }

    #[test]
    fn inbound_auth_debug_is_redacted() {
        let debug = format!("{:?}", InboundAuth::Bearer("hunter2".into()));
        assert!(!debug.contains("hunter2"));
    }
}
