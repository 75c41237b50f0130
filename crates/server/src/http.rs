//! HTTP Endpoints
//!
//! Lead intake, provider webhooks, call management and script rehearsals.

use axum::{
    extract::{Form, Json, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use voice_qualifier_core::CallResult;
use voice_qualifier_persistence::CallRecord;

use crate::rehearsal::{self, RehearsalTurn};
use crate::lifecycle::{self, NewLead, StatusCallback};
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::stream::stream_handler;
use crate::twiml;
use crate::ServerError;

const XML: [(header::HeaderName, &str); 1] = [(header::CONTENT_TYPE, "application/xml")];

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let config = state.get_config();
    let cors_layer = build_cors_layer(
        &config.server.cors_origins,
        config.server.cors_enabled,
        config.environment.is_production(),
    );
    let request_timeout = Duration::from_secs(config.server.timeout_seconds);

    Router::new()
        // Lead intake
        .route("/api/voice-ai/leads/new", post(new_lead))
        // Provider webhooks
        .route("/api/voice-ai/twilio/answer", post(answer))
        .route("/api/voice-ai/twilio/status", post(status_callback))
        .route("/api/voice-ai/twilio/recording-status", post(recording_status))
        // Call management
        .route("/api/voice-ai/calls/:id", get(get_call))
        .route("/api/voice-ai/calls/:id/transfer", post(transfer_call))
        .route("/api/voice-ai/calls/:id/end", post(end_call))
        // Script rehearsals through the request/response agent
        .route("/api/voice-ai/rehearsals", post(start_rehearsal))
        .route("/api/voice-ai/rehearsals/:id", delete(end_rehearsal))
        .route("/api/voice-ai/rehearsals/:id/turns", post(rehearsal_turn))
        // Health check
        .route("/health", get(health_check))
        // Prometheus metrics
        .route("/metrics", get(metrics_handler))
        // Timeout covers the routes above, not the media stream
        .layer(TimeoutLayer::new(request_timeout))
        .route("/api/voice-ai/stream", get(stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// CORS from configured origins
///
/// - Disabled: permissive
/// - No origins: any origin outside production, localhost:3000 in production
fn build_cors_layer(origins: &[String], enabled: bool, production: bool) -> CorsLayer {
    if !enabled {
        return CorsLayer::permissive();
    }

    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if !parsed_origins.is_empty() {
        tracing::info!("CORS configured with {} origins", parsed_origins.len());
        return CorsLayer::new()
            .allow_origin(parsed_origins)
            .allow_methods(methods)
            .allow_headers(Any);
    }

    if production {
        tracing::warn!("No valid CORS origins configured, defaulting to localhost:3000");
        CorsLayer::new()
            .allow_origin(HeaderValue::from_static("http://localhost:3000"))
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    }
}

/// Log and map a handler error onto its status code
fn reject(err: ServerError) -> StatusCode {
    match &err {
        ServerError::NotFound(_) | ServerError::InvalidRequest(_) | ServerError::Conflict(_) => {
            tracing::debug!(error = %err, "Request rejected")
        }
        _ => tracing::error!(error = %err, "Request failed"),
    }
    err.into()
}

/// `POST /api/voice-ai/leads/new`
async fn new_lead(
    State(state): State<AppState>,
    Json(lead): Json<NewLead>,
) -> Result<Json<Value>, StatusCode> {
    let record = lifecycle::create_call(&state, lead).await.map_err(reject)?;
    lifecycle::spawn_dial(state.clone(), record.id);

    Ok(Json(json!({
        "call_id": record.id,
        "status": record.status,
        "message": format!("Ligação para {} sendo iniciada", record.lead_name),
    })))
}

#[derive(Debug, Deserialize)]
struct AnswerCallback {
    #[serde(rename = "CallSid", default)]
    call_sid: String,
}

/// `POST /api/voice-ai/twilio/answer`
async fn answer(
    State(state): State<AppState>,
    Form(callback): Form<AnswerCallback>,
) -> impl IntoResponse {
    let stream_url = state
        .get_config()
        .telephony
        .stream_url("/api/voice-ai/stream");
    tracing::info!(call_sid = %callback.call_sid, "Answered, connecting media stream");
    (XML, twiml::connect_stream(&stream_url, &callback.call_sid))
}

/// `POST /api/voice-ai/twilio/status`
async fn status_callback(
    State(state): State<AppState>,
    Form(callback): Form<StatusCallback>,
) -> Result<impl IntoResponse, StatusCode> {
    lifecycle::handle_status(&state, callback)
        .await
        .map_err(reject)?;
    Ok((XML, ""))
}

#[derive(Debug, Deserialize)]
struct RecordingCallback {
    #[serde(rename = "CallSid", default)]
    call_sid: String,
    #[serde(rename = "RecordingUrl", default)]
    recording_url: String,
}

/// `POST /api/voice-ai/twilio/recording-status`
async fn recording_status(
    State(state): State<AppState>,
    Form(callback): Form<RecordingCallback>,
) -> Result<impl IntoResponse, StatusCode> {
    lifecycle::store_recording(&state, &callback.call_sid, &callback.recording_url)
        .await
        .map_err(reject)?;
    Ok((XML, ""))
}

/// `GET /api/voice-ai/calls/:id`
async fn get_call(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CallRecord>, StatusCode> {
    let record = lifecycle::get_call(&state, id).await.map_err(reject)?;
    Ok(Json(record))
}

/// `POST /api/voice-ai/calls/:id/transfer`
async fn transfer_call(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    lifecycle::transfer(&state, id).await.map_err(reject)?;
    Ok(Json(json!({ "status": "transferred" })))
}

/// `POST /api/voice-ai/calls/:id/end`
async fn end_call(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    lifecycle::end(&state, id).await.map_err(reject)?;
    Ok(Json(json!({ "status": "ended" })))
}

/// `POST /api/voice-ai/rehearsals`
async fn start_rehearsal(
    State(state): State<AppState>,
    Json(lead): Json<NewLead>,
) -> Result<Json<Value>, StatusCode> {
    let rehearsal = rehearsal::start_rehearsal(&state, lead)
        .await
        .map_err(reject)?;
    Ok(Json(json!({ "rehearsal_id": rehearsal.id() })))
}

#[derive(Debug, Deserialize)]
struct TypedUtterance {
    message: String,
}

/// `POST /api/voice-ai/rehearsals/:id/turns`
async fn rehearsal_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TypedUtterance>,
) -> Result<Json<RehearsalTurn>, StatusCode> {
    let turn = rehearsal::rehearsal_turn(&state, &id, &request.message)
        .await
        .map_err(reject)?;
    Ok(Json(turn))
}

/// `DELETE /api/voice-ai/rehearsals/:id`
async fn end_rehearsal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CallResult>, StatusCode> {
    let result = rehearsal::end_rehearsal(&state, &id).await.map_err(reject)?;
    Ok(Json(result))
}

/// Liveness with a few cheap facts about the running instance
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let config = state.get_config();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_calls": state.pipelines.len(),
        "active_rehearsals": state.rehearsals.len(),
        "telephony": if config.telephony.has_credentials() { "live" } else { "simulated" },
        "metrics": state.metrics.is_some(),
    }))
}
