//! API Router configuration

use super::metrics_handler::metrics_handler;
use super::sessions_handler::{get_sessions, health_check};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

/// Shared state of the operational endpoints
#[derive(Clone)]
pub struct ApiState {
    pub prometheus: Option<PrometheusHandle>,
    pub active_sessions: Arc<AtomicUsize>,
}

/// Build the API router
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/sessions", get(get_sessions))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    fn state() -> ApiState {
        ApiState {
            prometheus: None,
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_body(build_router(state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"success":true,"data":"OK"}"#);
    }

    #[tokio::test]
    async fn test_sessions_reports_active_count() {
        let state = state();
        state.active_sessions.store(3, Ordering::SeqCst);

        let (status, body) = get_body(build_router(state), "/sessions").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["data"]["active"], 3);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let (status, _) = get_body(build_router(state()), "/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
