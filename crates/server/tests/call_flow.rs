//! End-to-end call flow: media stream start to stored result
//!
//! The model side is a scripted in-memory link; scheduling, messaging, CRM
//! and QA are fakes that record what they were asked to do.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use voice_qualifier_agent::QaEvaluator;
use voice_qualifier_config::Settings;
use voice_qualifier_core::{CallOutcome, CallSession, CallState, FsmEngine, HandoffType, LeadInfo};
use voice_qualifier_integrations::{
    Crm, CrmCallReport, IntegrationError, Integrations, MeetingBooking, MeetingRequest, Messenger,
    Scheduler, StubScheduler,
};
use voice_qualifier_llm::{FinishReason, GenerationResult, LlmBackend, LlmError, Message};
use voice_qualifier_persistence::{CallRecord, CallStatus, CallStore, InMemoryCallStore};
use voice_qualifier_pipeline::{
    ModelConnector, ModelLink, ModelPeer, PipelineError, ServerEvent, StreamStart,
    TelephonyInbound, TelephonyLink, TelephonyPeer, LINK_CAPACITY,
};
use voice_qualifier_server::{lifecycle, stream::serve_call, AppState, ServerError};

struct FakeConnector {
    link: Mutex<Option<ModelLink>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    fn new(link: ModelLink) -> Self {
        Self {
            link: Mutex::new(Some(link)),
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelConnector for FakeConnector {
    async fn connect(&self, _call_id: &str) -> Result<ModelLink, PipelineError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.link
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| PipelineError::Connection("already connected".into()))
    }
}

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, phone: &str, text: &str) -> Result<(), IntegrationError> {
        self.sent
            .lock()
            .unwrap()
            .push((phone.to_string(), text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingCrm {
    reports: Mutex<Vec<CrmCallReport>>,
    moves: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Crm for RecordingCrm {
    async fn record_call(&self, report: &CrmCallReport) -> Result<(), IntegrationError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn move_in_funnel(&self, lead_id: &str, stage: &str) -> Result<(), IntegrationError> {
        self.moves
            .lock()
            .unwrap()
            .push((lead_id.to_string(), stage.to_string()));
        Ok(())
    }
}

/// Calendar that accepts every parseable slot
#[derive(Default)]
struct RecordingCalendar {
    requests: Mutex<Vec<MeetingRequest>>,
}

#[async_trait]
impl Scheduler for RecordingCalendar {
    async fn schedule(&self, request: &MeetingRequest) -> Result<MeetingBooking, IntegrationError> {
        let (start, _) = request.slot()?;
        self.requests.lock().unwrap().push(request.clone());
        Ok(MeetingBooking {
            event_id: "evt-1".to_string(),
            event_link: "https://calendar.example.com/evt-1".to_string(),
            date: start.format("%Y-%m-%d").to_string(),
            time: start.format("%H:%M").to_string(),
            closer: "Victoria".to_string(),
        })
    }
}

/// Chat backend with a fixed JSON reply
struct GradingBackend(&'static str);

#[async_trait]
impl LlmBackend for GradingBackend {
    async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult, LlmError> {
        Ok(GenerationResult {
            text: self.0.to_string(),
            tokens: 0,
            total_time_ms: 1,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        "grader"
    }
}

struct Harness {
    state: AppState,
    store: InMemoryCallStore,
    messenger: Arc<RecordingMessenger>,
    crm: Arc<RecordingCrm>,
    calendar: Arc<RecordingCalendar>,
    connector: Arc<FakeConnector>,
    // Held so the model side stays open until the end-call grace period
    _model: ModelPeer,
}

async fn harness(settings: Settings, events: Vec<ServerEvent>) -> Harness {
    let calendar = Arc::new(RecordingCalendar::default());
    let mut h = harness_with(settings, events, calendar.clone()).await;
    h.calendar = calendar;
    h
}

async fn harness_with(
    settings: Settings,
    events: Vec<ServerEvent>,
    scheduler: Arc<dyn Scheduler>,
) -> Harness {
    let (link, model) = ModelLink::pair(LINK_CAPACITY);
    for event in events {
        model.to_pipeline.send(event).await.unwrap();
    }
    let connector = Arc::new(FakeConnector::new(link));
    let store = InMemoryCallStore::new();
    let messenger = Arc::new(RecordingMessenger::default());
    let crm = Arc::new(RecordingCrm::default());

    let state = AppState::new(settings, connector.clone())
        .with_store(Arc::new(store.clone()))
        .with_integrations(
            Integrations::with_stubs()
                .with_scheduler(scheduler)
                .with_messenger(messenger.clone())
                .with_crm(crm.clone()),
        )
        .with_qa(Arc::new(QaEvaluator::new(Arc::new(GradingBackend(
            r#"{"script_adherence":0.8,"clarity_score":0.9,"outcome_quality":1.0,"notes":"Boa condução."}"#,
        )))));

    Harness {
        state,
        store,
        messenger,
        crm,
        calendar: Arc::new(RecordingCalendar::default()),
        connector,
        _model: model,
    }
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.realtime.end_call_grace_ms = 20;
    settings
}

/// A dialed record the stream can be matched against
async fn dialed_record(store: &InMemoryCallStore, sid: &str) -> CallRecord {
    let lead = LeadInfo::new("Ana Lima", "+5511999990000").with_course("MBA");
    let mut record = CallRecord::new(&lead, "+5511333330000");
    record.lead_id = Some("42".to_string());
    store.create(record.clone()).await.unwrap();
    store.set_provider_sid(record.id, sid).await.unwrap();
    record
}

fn start(call_sid: &str) -> StreamStart {
    StreamStart {
        stream_sid: "MZ1".to_string(),
        call_sid: None,
        custom_parameters: HashMap::from([("call_sid".to_string(), call_sid.to_string())]),
    }
}

/// Poll the registry until the live relay reaches `state`
async fn wait_for_state(h: &Harness, call_id: &str, state: CallState) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(handle) = h.state.pipelines.get(call_id) {
                if handle.state() == state {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay reached state");
}

fn greeting() -> Vec<ServerEvent> {
    vec![
        ServerEvent::SessionUpdated,
        ServerEvent::response_created(),
        ServerEvent::AssistantTranscriptDone {
            transcript: "Oi Ana! Aqui é a Nat, do CENAT.".into(),
        },
        ServerEvent::response_done(),
        ServerEvent::UserTranscriptCompleted {
            transcript: "Oi, pode falar".into(),
        },
    ]
}

#[tokio::test]
async fn test_scheduled_call_runs_post_call_actions() {
    let mut events = greeting();
    events.extend([
        ServerEvent::function_call(
            "fc1",
            "update_lead_fields",
            r#"{"confirmed_interest":"sim","objetivo":"especialização"}"#,
        ),
        ServerEvent::function_call("fc2", "change_state", r#"{"new_state":"CONTEXT"}"#),
        ServerEvent::function_call("fc3", "change_state", r#"{"new_state":"QUALIFY"}"#),
        ServerEvent::function_call(
            "fc4",
            "schedule_meeting",
            r#"{"date":"20/02/2026","time":"10:30"}"#,
        ),
        ServerEvent::function_call("fc5", "end_call", r#"{"reason":"agendado"}"#),
    ]);
    let h = harness(settings(), events).await;
    let call = dialed_record(&h.store, "CA0001").await;
    let (link, _telephony): (TelephonyLink, TelephonyPeer) = TelephonyLink::pair(LINK_CAPACITY);

    let record = serve_call(&h.state, &start("CA0001"), link).await.unwrap();

    assert_eq!(record.id, call.id);
    assert_eq!(record.outcome, Some(CallOutcome::Scheduled));
    assert_eq!(record.fsm_state, CallState::Schedule);
    assert_eq!(record.status, CallStatus::InProgress);
    assert_eq!(record.collected_fields["data_agendamento"], "20/02/2026");
    assert!(record.tags.contains(&"qualify_incomplete".to_string()));
    assert_eq!(record.transcript.len(), 2);
    assert!(record.result_stored);

    let stored = h.store.get(call.id).await.unwrap().unwrap();
    let booking = stored.handoff_data.expect("booking stored");
    assert_eq!(booking["closer"], "Victoria");
    assert_eq!(booking["date"], "2026-02-20");
    assert_eq!(booking["time"], "10:30");
    let requests = h.calendar.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].lead_name, "Ana Lima");
    assert_eq!(requests[0].duration_minutes, 30);

    let events: Vec<&str> = stored.events.iter().map(|e| e.event.as_str()).collect();
    assert!(events.contains(&"stream_connected"));
    assert!(events.contains(&"call_completed"));

    let sent = h.messenger.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+5511999990000");
    assert!(sent[0].1.contains("Agendamento Confirmado"));
    assert!(sent[0].1.contains("*sexta, 20/02* às *10:30*"));

    let reports = h.crm.reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, CallOutcome::Scheduled);
    assert_eq!(reports[0].agent_name, "Nat");
    assert_eq!(
        *h.crm.moves.lock().unwrap(),
        vec![("42".to_string(), "Reunião Agendada".to_string())]
    );

    let qa = stored.qa.expect("qa stored");
    assert!((qa.fields_completion - 0.4).abs() < 1e-4);
    assert!((qa.overall_score - 0.74).abs() < 1e-4);
    assert_eq!(qa.notes, "Boa condução.");

    assert!(h.state.pipelines.is_empty());
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_local_booking_sends_no_confirmation() {
    let mut events = greeting();
    events.extend([
        ServerEvent::function_call("fc1", "change_state", r#"{"new_state":"CONTEXT"}"#),
        ServerEvent::function_call("fc2", "change_state", r#"{"new_state":"QUALIFY"}"#),
        ServerEvent::function_call(
            "fc3",
            "schedule_meeting",
            r#"{"date":"23/02/2026","time":"14:00"}"#,
        ),
        ServerEvent::function_call("fc4", "end_call", r#"{"reason":"agendado"}"#),
    ]);
    let h = harness_with(settings(), events, Arc::new(StubScheduler::new("Victoria"))).await;
    let call = dialed_record(&h.store, "CA0001").await;
    let (link, _telephony) = TelephonyLink::pair(LINK_CAPACITY);

    let record = serve_call(&h.state, &start("CA0001"), link).await.unwrap();

    assert_eq!(record.outcome, Some(CallOutcome::Scheduled));
    let stored = h.store.get(call.id).await.unwrap().unwrap();
    let booking = stored.handoff_data.expect("booking stored");
    assert!(booking["event_link"].as_str().unwrap().starts_with("local://"));
    assert_eq!(booking["date"], "2026-02-23");
    assert!(h.messenger.sent.lock().unwrap().is_empty());
    assert_eq!(h.crm.moves.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_transfer_during_qualification() {
    let mut events = greeting();
    events.extend([
        ServerEvent::function_call("fc1", "change_state", r#"{"new_state":"CONTEXT"}"#),
        ServerEvent::function_call("fc2", "change_state", r#"{"new_state":"QUALIFY"}"#),
    ]);
    let h = harness(settings(), events).await;
    let call = dialed_record(&h.store, "CA0001").await;
    let (link, telephony) = TelephonyLink::pair(LINK_CAPACITY);

    let state = h.state.clone();
    let running = tokio::spawn(async move { serve_call(&state, &start("CA0001"), link).await });

    wait_for_state(&h, &call.id.to_string(), CallState::Qualify).await;
    lifecycle::transfer(&h.state, call.id).await.unwrap();
    telephony.to_pipeline.send(TelephonyInbound::Stop).await.unwrap();

    let record = running.await.unwrap().unwrap();
    assert_eq!(record.outcome, Some(CallOutcome::Transferred));
    assert_eq!(record.handoff_type, Some(HandoffType::WarmTransfer));
    assert_eq!(record.fsm_state, CallState::WarmTransfer);

    let stored = h.store.get(call.id).await.unwrap().unwrap();
    assert_eq!(stored.outcome, Some(CallOutcome::Transferred));
    let events: Vec<&str> = stored.events.iter().map(|e| e.event.as_str()).collect();
    let transferred = events.iter().position(|e| *e == "transferred").unwrap();
    let completed = events.iter().position(|e| *e == "call_completed").unwrap();
    assert!(transferred < completed);
    assert_eq!(h.crm.reports.lock().unwrap()[0].outcome, CallOutcome::Transferred);
}

#[tokio::test]
async fn test_transfer_refused_before_qualification() {
    let h = harness(settings(), greeting()).await;
    let call = dialed_record(&h.store, "CA0001").await;
    let (link, telephony) = TelephonyLink::pair(LINK_CAPACITY);

    let state = h.state.clone();
    let running = tokio::spawn(async move { serve_call(&state, &start("CA0001"), link).await });

    wait_for_state(&h, &call.id.to_string(), CallState::Opening).await;
    let err = lifecycle::transfer(&h.state, call.id).await.unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));

    let stored = h.store.get(call.id).await.unwrap().unwrap();
    assert_eq!(stored.outcome, None);
    assert!(stored.handoff_type.is_none());
    assert!(!stored.events.iter().any(|e| e.event == "transferred"));

    telephony.to_pipeline.send(TelephonyInbound::Stop).await.unwrap();
    let record = running.await.unwrap().unwrap();
    assert_eq!(record.outcome, Some(CallOutcome::Incomplete));
    assert_eq!(record.fsm_state, CallState::Opening);
}

#[tokio::test]
async fn test_unknown_stream_leaves_model_untouched() {
    let h = harness(settings(), greeting()).await;
    let (link, _telephony) = TelephonyLink::pair(LINK_CAPACITY);

    let err = serve_call(&h.state, &start("CA9999"), link).await.unwrap_err();

    assert!(matches!(err, ServerError::NotFound(_)));
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_follow_up_without_messages() {
    let mut settings = settings();
    settings.messaging.followup_enabled = false;
    let mut events = greeting();
    events.extend([
        ServerEvent::function_call("fc1", "change_state", r#"{"new_state":"CONTEXT"}"#),
        ServerEvent::function_call("fc2", "change_state", r#"{"new_state":"QUALIFY"}"#),
        ServerEvent::function_call(
            "fc3",
            "change_state",
            r#"{"new_state":"FOLLOW_UP","reason":"pediu material por escrito"}"#,
        ),
        ServerEvent::function_call("fc4", "end_call", r#"{"reason":"retorno combinado"}"#),
    ]);
    let h = harness(settings, events).await;
    dialed_record(&h.store, "CA0001").await;
    let (link, _telephony) = TelephonyLink::pair(LINK_CAPACITY);

    let record = serve_call(&h.state, &start("CA0001"), link).await.unwrap();

    assert_eq!(record.outcome, Some(CallOutcome::FollowUp));
    assert!(record.handoff_data.is_none());
    assert!(h.messenger.sent.lock().unwrap().is_empty());
    assert_eq!(h.crm.reports.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_results_are_saved_once() {
    let h = harness(settings(), Vec::new()).await;
    let call = dialed_record(&h.store, "CA0001").await;
    let engine = FsmEngine::new(CallSession::new(call.id.to_string(), call.lead()));
    let result = engine.build_result("Resumo não disponível".into(), 3);

    lifecycle::save_results(&h.state, call.id, &result).await.unwrap();
    let second = lifecycle::save_results(&h.state, call.id, &result).await;

    assert!(matches!(second, Err(ServerError::Persistence(_))));
    let stored = h.store.get(call.id).await.unwrap().unwrap();
    assert_eq!(stored.outcome, Some(CallOutcome::Incomplete));
    assert_eq!(stored.duration_seconds, 3);
}
