//! Prometheus metrics
//!
//! Counters and histograms are recorded with the `metrics` macros wherever
//! the event happens; this module only installs the exporter and renders it.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

/// Install the global Prometheus recorder.
///
/// Returns `None` when a recorder is already installed (tests, reloads).
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            describe();
            Some(handle)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    }
}

fn describe() {
    metrics::describe_counter!("voice_calls_started_total", "Relays started");
    metrics::describe_counter!("voice_calls_finalized_total", "Calls finalized, by outcome");
    metrics::describe_counter!("voice_barge_in_total", "Agent responses interrupted by the lead");
    metrics::describe_counter!("voice_tool_calls_total", "Tool calls dispatched, by tool");
    metrics::describe_counter!(
        "voice_invalid_transitions_total",
        "State changes rejected by the transition table"
    );
    metrics::describe_counter!("voice_retries_scheduled_total", "Redials scheduled");
    metrics::describe_histogram!("voice_call_duration_seconds", "Relay duration");
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}
