//! Router tests: intake, provider webhooks and call management
//!
//! Requests go through `oneshot`; the dialer is a recording fake and the
//! store is shared with the test so background work can be observed.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt; // for oneshot
use uuid::Uuid;

use voice_qualifier_config::Settings;
use voice_qualifier_core::CallOutcome;
use voice_qualifier_integrations::{DialRequest, Dialer, IntegrationError, Integrations};
use voice_qualifier_persistence::{CallRecord, CallStatus, CallStore, InMemoryCallStore};
use voice_qualifier_pipeline::{ModelConnector, ModelLink, PipelineError};
use voice_qualifier_server::{create_router, AppState};

#[derive(Default)]
struct RecordingDialer {
    dialed: AtomicUsize,
    redirects: Mutex<Vec<(String, String)>>,
    hangups: Mutex<Vec<String>>,
}

#[async_trait]
impl Dialer for RecordingDialer {
    async fn dial(&self, _request: &DialRequest) -> Result<String, IntegrationError> {
        let n = self.dialed.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("CA{:04}", n))
    }

    async fn redirect(&self, call_sid: &str, twiml: &str) -> Result<(), IntegrationError> {
        self.redirects
            .lock()
            .unwrap()
            .push((call_sid.to_string(), twiml.to_string()));
        Ok(())
    }

    async fn hangup(&self, call_sid: &str) -> Result<(), IntegrationError> {
        self.hangups.lock().unwrap().push(call_sid.to_string());
        Ok(())
    }
}

struct FailingDialer;

#[async_trait]
impl Dialer for FailingDialer {
    async fn dial(&self, _request: &DialRequest) -> Result<String, IntegrationError> {
        Err(IntegrationError::AuthFailed("bad credentials".into()))
    }

    async fn redirect(&self, _call_sid: &str, _twiml: &str) -> Result<(), IntegrationError> {
        Err(IntegrationError::AuthFailed("bad credentials".into()))
    }

    async fn hangup(&self, _call_sid: &str) -> Result<(), IntegrationError> {
        Err(IntegrationError::AuthFailed("bad credentials".into()))
    }
}

struct NoModel;

#[async_trait]
impl ModelConnector for NoModel {
    async fn connect(&self, _call_id: &str) -> Result<ModelLink, PipelineError> {
        Err(PipelineError::Connection("not in this test".into()))
    }
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.telephony.account_sid = None;
    settings.telephony.auth_token = None;
    settings.telephony.from_number = "+5511333330000".to_string();
    settings.telephony.public_base_url = "https://voice.example.com".to_string();
    settings.retry.delay_minutes = vec![0];
    settings
}

struct TestApp {
    router: Router,
    store: InMemoryCallStore,
    dialer: Arc<RecordingDialer>,
}

fn test_app(settings: Settings) -> TestApp {
    let store = InMemoryCallStore::new();
    let dialer = Arc::new(RecordingDialer::default());
    let state = AppState::new(settings, Arc::new(NoModel))
        .with_store(Arc::new(store.clone()))
        .with_integrations(Integrations::with_stubs().with_dialer(dialer.clone()));
    TestApp {
        router: create_router(state),
        store,
        dialer,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Poll the store until `check` holds for the record
async fn wait_for(
    store: &InMemoryCallStore,
    id: Uuid,
    check: impl Fn(&CallRecord) -> bool,
) -> CallRecord {
    for _ in 0..200 {
        if let Some(record) = store.get(id).await.unwrap() {
            if check(&record) {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("record {} never reached the expected state", id);
}

/// Intake a lead and wait until the dial is recorded
async fn dialed_call(app: &TestApp) -> CallRecord {
    let (status, body) = send(
        &app.router,
        post_json(
            "/api/voice-ai/leads/new",
            json!({"name": "Ana Lima", "phone": "(11) 99999-0000", "course": "MBA", "lead_id": 42}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    let id: Uuid = body["call_id"].as_str().unwrap().parse().unwrap();
    wait_for(&app.store, id, |r| r.provider_call_sid.is_some()).await
}

#[tokio::test]
async fn test_health() {
    let app = test_app(settings());
    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_calls"], 0);
    assert_eq!(body["active_rehearsals"], 0);
    assert_eq!(body["telephony"], "simulated");
}

#[tokio::test]
async fn test_metrics_disabled_without_recorder() {
    let app = test_app(settings());
    let (status, _) = send(&app.router, get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_new_lead_creates_and_dials() {
    let app = test_app(settings());
    let (status, body) = send(
        &app.router,
        post_json(
            "/api/voice-ai/leads/new",
            json!({"name": "Ana Lima", "phone": "(11) 99999-0000", "course": "MBA"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "pending");
    assert!(body["message"].as_str().unwrap().contains("Ana Lima"));

    let id: Uuid = body["call_id"].as_str().unwrap().parse().unwrap();
    let record = wait_for(&app.store, id, |r| r.status == CallStatus::Initiated).await;
    assert_eq!(record.to_number, "+5511999990000");
    assert_eq!(record.from_number, "+5511333330000");
    assert_eq!(record.provider_call_sid.as_deref(), Some("CA0001"));
    assert_eq!(record.attempt_number, 1);
    assert!(record.started_at.is_some());
    assert!(record.events.iter().any(|e| e.event == "call_initiated"));

    let (status, body) = send(&app.router, get(&format!("/api/voice-ai/calls/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "initiated");
    assert_eq!(body["course"], "MBA");
}

#[tokio::test]
async fn test_new_lead_rejects_invalid_input() {
    let app = test_app(settings());
    let (status, _) = send(
        &app.router,
        post_json("/api/voice-ai/leads/new", json!({"name": "Ana", "phone": "abc"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post_json("/api/voice-ai/leads/new", json!({"name": "  ", "phone": "11999990000"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_dial_failure_marks_error() {
    let store = InMemoryCallStore::new();
    let state = AppState::new(settings(), Arc::new(NoModel))
        .with_store(Arc::new(store.clone()))
        .with_integrations(Integrations::with_stubs().with_dialer(Arc::new(FailingDialer)));
    let router = create_router(state);

    let (status, body) = send(
        &router,
        post_json("/api/voice-ai/leads/new", json!({"name": "Ana", "phone": "11999990000"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    let id: Uuid = body["call_id"].as_str().unwrap().parse().unwrap();

    let record = wait_for(&store, id, |r| r.status == CallStatus::Failed).await;
    assert_eq!(record.outcome, Some(CallOutcome::Error));
    assert!(record.provider_call_sid.is_none());
}

#[tokio::test]
async fn test_answer_returns_stream_twiml() {
    let app = test_app(settings());
    let response = app
        .router
        .clone()
        .oneshot(post_form("/api/voice-ai/twilio/answer", "CallSid=CA123&From=%2B5511"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/xml"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains(r#"<Stream url="wss://voice.example.com/api/voice-ai/stream""#));
    assert!(body.contains(r#"<Parameter name="call_sid" value="CA123"/>"#));
}

#[tokio::test]
async fn test_status_callbacks_stamp_times() {
    let app = test_app(settings());
    let call = dialed_call(&app).await;

    let (status, _) = send(
        &app.router,
        post_form(
            "/api/voice-ai/twilio/status",
            "CallSid=CA0001&CallStatus=answered",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let record = app.store.get(call.id).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Answered);
    assert!(record.answered_at.is_some());
    assert!(record.ended_at.is_none());

    send(
        &app.router,
        post_form(
            "/api/voice-ai/twilio/status",
            "CallSid=CA0001&CallStatus=completed&CallDuration=42",
        ),
    )
    .await;
    let record = app.store.get(call.id).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Completed);
    assert_eq!(record.duration_seconds, 42);
    assert!(record.ended_at.is_some());
    assert!(record.outcome.is_none());
    assert_eq!(app.store.len(), 1);
}

#[tokio::test]
async fn test_busy_schedules_retry() {
    let app = test_app(settings());
    let call = dialed_call(&app).await;

    let (status, _) = send(
        &app.router,
        post_form(
            "/api/voice-ai/twilio/status",
            "CallSid=CA0001&CallStatus=busy&CallDuration=0",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let first = app.store.get(call.id).await.unwrap().unwrap();
    assert_eq!(first.outcome, Some(CallOutcome::Busy));
    assert!(first.ended_at.is_some());

    let mut retry = None;
    for _ in 0..200 {
        retry = app.store.find_by_provider_sid("CA0002").await.unwrap();
        if retry.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let retry = retry.expect("retry was dialed");
    assert_eq!(retry.attempt_number, 2);
    assert_eq!(retry.retry_of_call_id, Some(call.id));
    assert_eq!(retry.to_number, call.to_number);
    assert_eq!(retry.lead_id.as_deref(), Some("42"));
    assert_eq!(app.store.len(), 2);
}

#[tokio::test]
async fn test_no_retry_when_attempts_exhausted() {
    let mut settings = settings();
    settings.retry.max_attempts = 1;
    let app = test_app(settings);
    let call = dialed_call(&app).await;

    send(
        &app.router,
        post_form("/api/voice-ai/twilio/status", "CallSid=CA0001&CallStatus=no-answer"),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = app.store.get(call.id).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::NoAnswer);
    assert_eq!(record.outcome, Some(CallOutcome::NoAnswer));
    assert_eq!(app.store.len(), 1);
    assert_eq!(app.dialer.dialed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_status_or_call_is_acknowledged() {
    let app = test_app(settings());
    let (status, _) = send(
        &app.router,
        post_form("/api/voice-ai/twilio/status", "CallSid=CA9999&CallStatus=ringing"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let call = dialed_call(&app).await;
    let (status, _) = send(
        &app.router,
        post_form("/api/voice-ai/twilio/status", "CallSid=CA0001&CallStatus=teleported"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let record = app.store.get(call.id).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Initiated);
}

#[tokio::test]
async fn test_recording_status_stores_mp3() {
    let app = test_app(settings());
    let call = dialed_call(&app).await;

    let (status, _) = send(
        &app.router,
        post_form(
            "/api/voice-ai/twilio/recording-status",
            "CallSid=CA0001&RecordingUrl=https%3A%2F%2Fapi.example.com%2FRecordings%2FRE1",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let record = app.store.get(call.id).await.unwrap().unwrap();
    assert_eq!(
        record.recording_url.as_deref(),
        Some("https://api.example.com/Recordings/RE1.mp3")
    );
}

#[tokio::test]
async fn test_transfer_redirects_and_marks_outcome() {
    let mut settings = settings();
    settings.telephony.transfer_number = Some("+5511444440000".to_string());
    let app = test_app(settings);
    let call = dialed_call(&app).await;

    let (status, body) = send(
        &app.router,
        post_json(&format!("/api/voice-ai/calls/{}/transfer", call.id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["status"], "transferred");

    let redirects = app.dialer.redirects.lock().unwrap().clone();
    assert_eq!(redirects.len(), 1);
    assert_eq!(redirects[0].0, "CA0001");
    assert!(redirects[0].1.contains("<Dial>+5511444440000</Dial>"));

    let (_, body) = send(&app.router, get(&format!("/api/voice-ai/calls/{}", call.id))).await;
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["outcome"], "transferred");
    assert_eq!(body["handoff_type"], "warm_transfer");
}

#[tokio::test]
async fn test_end_hangs_up() {
    let app = test_app(settings());
    let call = dialed_call(&app).await;

    let (status, body) = send(
        &app.router,
        post_json(&format!("/api/voice-ai/calls/{}/end", call.id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["status"], "ended");
    assert_eq!(*app.dialer.hangups.lock().unwrap(), vec!["CA0001".to_string()]);
}

#[tokio::test]
async fn test_management_of_unknown_calls() {
    let app = test_app(settings());
    let missing = Uuid::new_v4();

    let (status, _) = send(&app.router, get(&format!("/api/voice-ai/calls/{}", missing))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app.router,
        post_json(&format!("/api/voice-ai/calls/{}/transfer", missing), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app.router, get("/api/voice-ai/calls/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
