pub mod error;
mod handlers;
mod ws;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::session::SessionRegistry;

use handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub config: Arc<Config>,
}

pub(crate) fn get_session(
    sessions: &SessionRegistry,
    id: &str,
) -> Result<crate::session::Session, error::ApiError> {
    sessions
        .get(id)
        .ok_or_else(|| error::ApiError::SessionNotFound(id.to_string()))
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/sessions", get(session_list).post(session_create))
        .route("/sessions/{id}", get(session_get).delete(session_terminate))
        .route("/sessions/{id}/size", post(session_resize))
        .route("/sessions/{id}/screen", get(session_screen))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt; // for oneshot()

    fn test_state() -> AppState {
        AppState {
            sessions: SessionRegistry::new(),
            config: Arc::new(Config::default()),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = router(test_state());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn session_create_returns_descriptor() {
        let state = test_state();
        let app = router(state.clone());

        let body = serde_json::json!({ "shell": "/bin/sh" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert!(json["id"].is_string());
        assert_eq!(json["cols"], 80);
        assert_eq!(json["rows"], 24);
        assert_eq!(json["state"], "running");

        let id = json["id"].as_str().unwrap();
        state.sessions.terminate(id).unwrap();
    }

    #[tokio::test]
    async fn session_create_rejects_zero_cols() {
        let app = router(test_state());

        let body = serde_json::json!({ "shell": "/bin/sh", "cols": 0 });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "invalid_dimensions");
    }

    #[tokio::test]
    async fn session_get_nonexistent_returns_404() {
        let app = router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/sessions/no-such-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "session_not_found");
    }

    #[tokio::test]
    async fn session_list_reflects_created_sessions() {
        let state = test_state();
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["sessions"].as_array().unwrap().len(), 0);

        let create = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"shell":"/bin/sh"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = body_json(create).await["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["sessions"].as_array().unwrap().len(), 1);
        assert_eq!(json["sessions"][0]["id"], id.as_str());

        state.sessions.terminate(&id).unwrap();
    }

    #[tokio::test]
    async fn session_delete_then_get_returns_404() {
        let state = test_state();
        let app = router(state);

        let create = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"shell":"/bin/sh"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = body_json(create).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Terminating again is NotFound as well.
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn session_resize_updates_descriptor() {
        let state = test_state();
        let app = router(state.clone());

        let create = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"shell":"/bin/sh"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = body_json(create).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/sessions/{id}/size"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"cols":120,"rows":40}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["cols"], 120);
        assert_eq!(json["rows"], 40);

        state.sessions.terminate(&id).unwrap();
    }

    #[tokio::test]
    async fn session_screen_returns_snapshot() {
        let state = test_state();
        let app = router(state.clone());

        let create = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"shell":"/bin/sh"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = body_json(create).await["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{id}/screen?format=plain"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["cols"], 80);
        assert_eq!(json["rows"], 24);
        assert_eq!(json["lines"].as_array().unwrap().len(), 24);

        state.sessions.terminate(&id).unwrap();
    }

    #[tokio::test]
    async fn ws_route_exists() {
        let app = router(test_state());

        // Without an upgrade handshake the route answers non-404.
        let response = app
            .oneshot(Request::builder().uri("/api/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }
}
