//! Prometheus metrics handler

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::router::ApiState;

/// Install the Prometheus recorder and describe the orchestrator's metrics
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| DomainError::Config(format!("Failed to install metrics recorder: {}", e)))?;

    describe_counter!(
        "stasis_sessions_total",
        "Call-start occurrences handled, by outcome"
    );
    describe_gauge!(
        "stasis_active_sessions",
        "Sessions between call-start and bridge"
    );
    describe_counter!("stasis_races_total", "Dial races, by outcome");
    describe_counter!(
        "stasis_originate_failures_total",
        "Candidate originations that failed"
    );
    describe_counter!(
        "stasis_linked_hangups_total",
        "Legs hung up because another member of their group went down"
    );
    describe_counter!("stasis_bridges_total", "Bridge sequences, by result");

    Ok(handle)
}

/// HTTP metrics handler
pub async fn metrics_handler(State(state): State<ApiState>) -> Response {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
