//! Health and session endpoints

use super::dto::{ApiResponse, SessionStats};
use super::router::ApiState;
use axum::{extract::State, Json};
use std::sync::atomic::Ordering;
use tracing::debug;

/// Health check endpoint
pub async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("OK"))
}

/// Active session count
pub async fn get_sessions(State(state): State<ApiState>) -> Json<ApiResponse<SessionStats>> {
    let active = state.active_sessions.load(Ordering::SeqCst);
    debug!("API: {} active sessions", active);
    Json(ApiResponse::success(SessionStats { active }))
}
