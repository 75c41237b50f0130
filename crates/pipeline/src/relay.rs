//! Voice relay: one call, two connections
//!
//! ## Flow
//!
//! 1. Connect to the realtime model and send the session configuration
//! 2. Greeting with turn detection suspended; re-armed on the first `response.done`
//! 3. Relay A (telephony → model) and relay B (model → telephony) raced in one task
//! 4. Finalize once: summary, outcome, registry removal
//!
//! The session is shared with the management handle through a mutex that is
//! never held across an await.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, timeout};

use voice_qualifier_agent::{summarize_or_placeholder, tool_definitions, CallSummarizer, ToolCommand};
use voice_qualifier_core::{CallOutcome, CallResult, CallState, FsmEngine, TurnRole};

use crate::config::PipelineConfig;
use crate::frames::{ClientEvent, ServerEvent, TelephonyInbound, TelephonyOutbound};
use crate::link::{ModelConnector, ModelLink, TelephonyLink};
use crate::phase::PipelinePhase;
use crate::registry::{PipelineHandle, PipelineRegistry};
use crate::PipelineError;

/// Why the relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Telephony sent `stop`
    Hangup,
    TelephonyClosed,
    /// Model closed its connection; a normal end of call
    ModelClosed,
    MaxDuration,
    /// Agent called `end_call` and the grace period elapsed
    AgentEnded,
}

impl RelayEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayEnd::Hangup => "hangup",
            RelayEnd::TelephonyClosed => "telephony_closed",
            RelayEnd::ModelClosed => "model_closed",
            RelayEnd::MaxDuration => "max_duration",
            RelayEnd::AgentEnded => "agent_ended",
        }
    }
}

/// One call's relay between the telephony stream and the realtime model
pub struct VoicePipeline {
    call_id: String,
    config: PipelineConfig,
    instructions: String,
    engine: Arc<Mutex<FsmEngine>>,
    summarizer: Arc<dyn CallSummarizer>,
    registry: Option<PipelineRegistry>,
    phase_tx: watch::Sender<PipelinePhase>,
    started: Mutex<Instant>,
    finalized: AtomicBool,
    setup_failed: AtomicBool,
}

impl VoicePipeline {
    pub fn new(
        engine: FsmEngine,
        config: PipelineConfig,
        instructions: String,
        summarizer: Arc<dyn CallSummarizer>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(PipelinePhase::Idle);
        Self {
            call_id: engine.session().call_id.clone(),
            config,
            instructions,
            engine: Arc::new(Mutex::new(engine)),
            summarizer,
            registry: None,
            phase_tx,
            started: Mutex::new(Instant::now()),
            finalized: AtomicBool::new(false),
            setup_failed: AtomicBool::new(false),
        }
    }

    /// Register on attach; the entry is removed in [`VoicePipeline::finalize`]
    pub fn with_registry(mut self, registry: PipelineRegistry) -> Self {
        registry.register(self.handle());
        self.registry = Some(registry);
        self
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle::new(
            self.call_id.clone(),
            self.engine.clone(),
            self.phase_tx.subscribe(),
        )
    }

    pub fn phase(&self) -> PipelinePhase {
        *self.phase_tx.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<PipelinePhase> {
        self.phase_tx.subscribe()
    }

    fn set_phase(&self, phase: PipelinePhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            tracing::debug!(call_id = %self.call_id, from = %previous, to = %phase, "Pipeline phase");
        }
    }

    /// Run the call to completion and finalize it.
    ///
    /// `stream_sid` is known when the caller already consumed the `start` frame.
    /// The duration ceiling counts from here, setup included.
    /// Returns `None` only if the pipeline was already finalized.
    pub async fn run(
        &self,
        connector: &dyn ModelConnector,
        telephony: TelephonyLink,
        stream_sid: Option<String>,
    ) -> Option<CallResult> {
        *self.started.lock() = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.max_call_duration;
        metrics::counter!("voice_calls_started_total").increment(1);

        match self.drive(connector, telephony, stream_sid, deadline).await {
            Ok(end) => {
                tracing::info!(call_id = %self.call_id, reason = end.as_str(), "Relay ended");
            }
            Err(e) => {
                let phase = self.phase();
                tracing::error!(call_id = %self.call_id, phase = %phase, error = %e, "Relay failed");
                if phase.is_setup() {
                    self.setup_failed.store(true, Ordering::SeqCst);
                }
                self.set_phase(PipelinePhase::Error);
            }
        }

        self.finalize().await
    }

    async fn drive(
        &self,
        connector: &dyn ModelConnector,
        telephony: TelephonyLink,
        stream_sid: Option<String>,
        deadline: tokio::time::Instant,
    ) -> Result<RelayEnd, PipelineError> {
        self.set_phase(PipelinePhase::Connecting);
        let mut model = timeout(self.config.connect_timeout, connector.connect(&self.call_id))
            .await
            .map_err(|_| PipelineError::Timeout("model connect"))??;

        self.set_phase(PipelinePhase::Configuring);
        self.configure(&mut model).await?;

        self.set_phase(PipelinePhase::Greeting);
        self.greet(&model.commands).await?;

        let (sid_tx, sid_rx) = watch::channel(stream_sid);

        let ModelLink { events, commands } = model;
        let TelephonyLink { inbound, outbound } = telephony;

        let end = tokio::select! {
            end = relay_inbound(&self.call_id, inbound, commands.clone(), sid_tx, deadline) => end,
            end = self.relay_outbound(events, commands, outbound, sid_rx) => end,
        };

        // A model that stops accepting commands has hung up
        match end {
            Err(PipelineError::ChannelClosed("model")) => Ok(RelayEnd::ModelClosed),
            other => other,
        }
    }

    /// Send the session configuration and wait for `session.updated`
    async fn configure(&self, model: &mut ModelLink) -> Result<(), PipelineError> {
        let update = self
            .config
            .session
            .session_update(&self.instructions, tool_definitions());
        send_model(&model.commands, update).await?;

        let wait = async {
            loop {
                match model.events.recv().await {
                    Some(ServerEvent::SessionUpdated) => return Ok(()),
                    Some(ServerEvent::Error { error }) => {
                        return Err(PipelineError::Configuration(error.message))
                    }
                    Some(ServerEvent::TransportError(e)) => return Err(PipelineError::Transport(e)),
                    Some(_) => continue,
                    None => return Err(PipelineError::ChannelClosed("model")),
                }
            }
        };
        timeout(self.config.configure_timeout, wait)
            .await
            .map_err(|_| PipelineError::Timeout("session configuration"))?
    }

    /// Suspend turn detection, discard buffered input, request the greeting
    async fn greet(&self, commands: &mpsc::Sender<ClientEvent>) -> Result<(), PipelineError> {
        send_model(commands, self.config.session.suspend_turn_detection()).await?;
        send_model(commands, ClientEvent::InputAudioClear).await?;
        send_model(commands, ClientEvent::ResponseCreate).await?;
        tracing::debug!(call_id = %self.call_id, "Greeting requested");
        Ok(())
    }

    /// Relay B: model events to telephony, transcripts and tool calls to the session
    async fn relay_outbound(
        &self,
        mut events: mpsc::Receiver<ServerEvent>,
        commands: mpsc::Sender<ClientEvent>,
        outbound: mpsc::Sender<TelephonyOutbound>,
        sid: watch::Receiver<Option<String>>,
    ) -> Result<RelayEnd, PipelineError> {
        let mut turn_detection_armed = false;
        let mut response_in_flight = false;
        // Deltas of a cancelled response still in the model's send queue
        let mut dropping_audio = false;
        let mut end_deadline: Option<tokio::time::Instant> = None;

        loop {
            let event = match end_deadline {
                Some(deadline) => tokio::select! {
                    _ = sleep_until(deadline) => return Ok(RelayEnd::AgentEnded),
                    event = events.recv() => event,
                },
                None => events.recv().await,
            };
            let Some(event) = event else {
                return Ok(RelayEnd::ModelClosed);
            };

            match event {
                ServerEvent::ResponseCreated { .. } => {
                    response_in_flight = true;
                    dropping_audio = false;
                }
                ServerEvent::AudioDelta { delta, .. } => {
                    if dropping_audio {
                        continue;
                    }
                    let stream_sid = sid.borrow().clone();
                    if let Some(stream_sid) = stream_sid {
                        if outbound
                            .send(TelephonyOutbound::media(stream_sid, delta))
                            .await
                            .is_err()
                        {
                            return Ok(RelayEnd::TelephonyClosed);
                        }
                    }
                }
                ServerEvent::AssistantTranscriptDone { transcript } => {
                    tracing::debug!(call_id = %self.call_id, text = %transcript, "Agent said");
                    self.engine.lock().add_turn(TurnRole::Assistant, &transcript);
                }
                ServerEvent::UserTranscriptCompleted { transcript } => {
                    tracing::debug!(call_id = %self.call_id, text = %transcript, "Lead said");
                    self.engine.lock().add_turn(TurnRole::User, &transcript);
                }
                ServerEvent::FunctionCallArgumentsDone {
                    call_id,
                    name,
                    arguments,
                } => {
                    let ends_call = self.handle_tool_call(&commands, call_id, &name, &arguments).await?;
                    if ends_call && end_deadline.is_none() {
                        end_deadline = Some(tokio::time::Instant::now() + self.config.end_call_grace);
                    }
                }
                ServerEvent::ResponseDone { response } => {
                    response_in_flight = false;
                    if !turn_detection_armed {
                        send_model(&commands, self.config.session.rearm_turn_detection()).await?;
                        turn_detection_armed = true;
                        self.set_phase(PipelinePhase::Active);
                    }
                    if response.requests_end_call() && end_deadline.is_none() {
                        tracing::info!(call_id = %self.call_id, "Agent requested hangup");
                        end_deadline = Some(tokio::time::Instant::now() + self.config.end_call_grace);
                    }
                }
                ServerEvent::SpeechStarted => {
                    // Turn detection is off during the greeting; never cancel then.
                    if turn_detection_armed && response_in_flight {
                        self.barge_in(&commands, &outbound, &sid).await?;
                        response_in_flight = false;
                        dropping_audio = true;
                    }
                }
                ServerEvent::SpeechStopped => {}
                ServerEvent::Error { error } => {
                    tracing::warn!(
                        call_id = %self.call_id,
                        kind = ?error.kind,
                        code = ?error.code,
                        message = %error.message,
                        "Realtime model error"
                    );
                }
                ServerEvent::TransportError(e) => return Err(PipelineError::Transport(e)),
                ServerEvent::SessionCreated | ServerEvent::SessionUpdated | ServerEvent::Other => {}
            }
        }
    }

    /// Cancel the in-flight response and flush telephony playback
    async fn barge_in(
        &self,
        commands: &mpsc::Sender<ClientEvent>,
        outbound: &mpsc::Sender<TelephonyOutbound>,
        sid: &watch::Receiver<Option<String>>,
    ) -> Result<(), PipelineError> {
        send_model(commands, ClientEvent::ResponseCancel).await?;
        let stream_sid = sid.borrow().clone();
        if let Some(stream_sid) = stream_sid {
            if outbound.send(TelephonyOutbound::clear(stream_sid)).await.is_err() {
                tracing::debug!(call_id = %self.call_id, "Telephony gone during barge-in");
            }
        }
        self.engine.lock().record_barge_in();
        metrics::counter!("voice_barge_in_total").increment(1);
        tracing::debug!(call_id = %self.call_id, "Barge-in");
        Ok(())
    }

    /// Execute a tool call and acknowledge it; returns whether the call should end
    async fn handle_tool_call(
        &self,
        commands: &mpsc::Sender<ClientEvent>,
        call_id: String,
        name: &str,
        arguments: &str,
    ) -> Result<bool, PipelineError> {
        let command = ToolCommand::parse(name, arguments);
        let tool = command.name().to_string();
        let is_state_change = matches!(command, ToolCommand::ChangeState { .. });

        let outcome = {
            let mut engine = self.engine.lock();
            let before = engine.state();
            let outcome = command.execute(&mut engine);
            tracing::info!(
                call_id = %self.call_id,
                tool = %tool,
                from = %before,
                to = %engine.state(),
                "Tool call"
            );
            outcome
        };

        metrics::counter!("voice_tool_calls_total", "tool" => tool).increment(1);
        if is_state_change && outcome.output["success"] == false {
            metrics::counter!("voice_invalid_transitions_total").increment(1);
        }

        send_model(commands, ClientEvent::function_output(call_id, &outcome.output)).await?;
        send_model(commands, ClientEvent::ResponseCreate).await?;
        Ok(outcome.ends_call)
    }

    /// Build the terminal result. Runs at most once; later calls return `None`.
    pub async fn finalize(&self) -> Option<CallResult> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.set_phase(PipelinePhase::Finalizing);

        let snapshot = self.engine.lock().session().clone();
        let summary = summarize_or_placeholder(self.summarizer.as_ref(), &snapshot).await;
        let duration = self.started.lock().elapsed().as_secs();

        let mut result = self.engine.lock().build_result(summary, duration);
        if self.setup_failed.load(Ordering::SeqCst) {
            result.outcome = CallOutcome::Error;
        }

        if let Some(registry) = &self.registry {
            registry.remove(&self.call_id);
        }

        metrics::counter!("voice_calls_finalized_total", "outcome" => result.outcome.as_str())
            .increment(1);
        metrics::histogram!("voice_call_duration_seconds").record(duration as f64);

        tracing::info!(
            call_id = %self.call_id,
            outcome = %result.outcome,
            score = result.score,
            final_state = %result.final_state,
            turns = result.total_turns,
            duration_secs = duration,
            "Call finalized"
        );

        self.set_phase(PipelinePhase::Done);
        Some(result)
    }

    /// Current conversation state
    pub fn state(&self) -> CallState {
        self.engine.lock().state()
    }
}

/// Relay A: telephony frames to the model, until stop, close or the duration ceiling.
///
/// Audio is offered without waiting: a model that stops draining its queue
/// loses frames, never the duration ceiling.
async fn relay_inbound(
    call_id: &str,
    mut inbound: mpsc::Receiver<TelephonyInbound>,
    commands: mpsc::Sender<ClientEvent>,
    sid: watch::Sender<Option<String>>,
    deadline: tokio::time::Instant,
) -> Result<RelayEnd, PipelineError> {
    let mut dropped: u64 = 0;
    loop {
        let frame = tokio::select! {
            _ = sleep_until(deadline) => {
                tracing::warn!(call_id = %call_id, dropped_frames = dropped, "Call duration ceiling reached");
                return Ok(RelayEnd::MaxDuration);
            }
            frame = inbound.recv() => frame,
        };

        match frame {
            None => return Ok(RelayEnd::TelephonyClosed),
            Some(TelephonyInbound::Media { media }) => {
                let append = ClientEvent::InputAudioAppend {
                    audio: media.payload,
                };
                match commands.try_send(append) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        if dropped == 0 {
                            tracing::warn!(call_id = %call_id, "Model queue full, dropping caller audio");
                        }
                        dropped += 1;
                        metrics::counter!("voice_audio_frames_dropped_total").increment(1);
                    }
                    Err(TrySendError::Closed(_)) => return Ok(RelayEnd::ModelClosed),
                }
            }
            Some(TelephonyInbound::Start { start }) => {
                tracing::debug!(call_id = %call_id, stream_sid = %start.stream_sid, "Stream started");
                sid.send_replace(Some(start.stream_sid));
            }
            Some(TelephonyInbound::Connected {
                stream_sid: Some(stream_sid),
            }) => {
                // `start` stays authoritative; this only fills a missing sid
                sid.send_if_modified(|current| {
                    if current.is_some() {
                        return false;
                    }
                    tracing::debug!(call_id = %call_id, stream_sid = %stream_sid, "Stream sid from connected frame");
                    *current = Some(stream_sid);
                    true
                });
            }
            Some(TelephonyInbound::Stop) => return Ok(RelayEnd::Hangup),
            Some(
                TelephonyInbound::Connected { stream_sid: None }
                | TelephonyInbound::Mark
                | TelephonyInbound::Unknown,
            ) => {}
        }
    }
}

async fn send_model(
    commands: &mpsc::Sender<ClientEvent>,
    event: ClientEvent,
) -> Result<(), PipelineError> {
    commands
        .send(event)
        .await
        .map_err(|_| PipelineError::ChannelClosed("model"))
}
