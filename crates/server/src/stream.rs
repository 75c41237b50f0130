//! Telephony media stream endpoint
//!
//! The socket is bridged onto a [`TelephonyLink`]: a reader task parses
//! frames into the pipeline, a writer task serialises the pipeline's frames
//! back. The call itself runs in [`serve_call`], which tests drive directly.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;

use voice_qualifier_agent::InstructionBuilder;
use voice_qualifier_core::{CallScript, CallSession, CallState, FsmEngine};
use voice_qualifier_integrations::retrieve_or_empty;
use voice_qualifier_persistence::{CallEvent, CallRecord, CallStatus};
use voice_qualifier_pipeline::{
    PipelineConfig, StreamStart, TelephonyInbound, TelephonyLink, TelephonyPeer, VoicePipeline,
    LINK_CAPACITY,
};

use crate::lifecycle;
use crate::state::AppState;
use crate::ServerError;

/// How long the writer may keep flushing after the relay ended
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// `GET /api/voice-ai/stream`
pub async fn stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let Some(start) = wait_for_start(&mut receiver).await else {
        tracing::debug!("Media stream closed before start");
        return;
    };
    tracing::info!(
        stream_sid = %start.stream_sid,
        call_sid = ?start.correlation_id(),
        "Media stream connected"
    );

    let (link, peer) = TelephonyLink::pair(LINK_CAPACITY);
    let TelephonyPeer {
        to_pipeline,
        mut from_pipeline,
    } = peer;

    let reader = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            let frame = match message {
                Ok(Message::Text(text)) => TelephonyInbound::parse(&text),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "Media stream read error");
                    break;
                }
            };
            let stop = matches!(frame, TelephonyInbound::Stop);
            if to_pipeline.send(frame).await.is_err() || stop {
                break;
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(frame) = from_pipeline.recv().await {
            match serde_json::to_string(&frame) {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Unserializable telephony frame"),
            }
        }
        let _ = sender.close().await;
    });

    match serve_call(&state, &start, link).await {
        Ok(record) => tracing::info!(
            call_id = %record.id,
            outcome = ?record.outcome,
            "Media stream finished"
        ),
        Err(ServerError::NotFound(what)) => {
            tracing::warn!(stream_sid = %start.stream_sid, missing = %what, "Media stream for unknown call")
        }
        Err(e) => tracing::error!(stream_sid = %start.stream_sid, error = %e, "Media stream failed"),
    }

    reader.abort();
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        tracing::debug!("Media stream writer did not drain in time");
    }
}

/// Skip `connected` frames until `start`; `None` if the stream ends first
async fn wait_for_start(receiver: &mut SplitStream<WebSocket>) -> Option<StreamStart> {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match TelephonyInbound::parse(&text) {
                TelephonyInbound::Start { start } => return Some(start),
                TelephonyInbound::Connected {
                    stream_sid: Some(stream_sid),
                } => tracing::debug!(stream_sid = %stream_sid, "Media stream announced"),
                TelephonyInbound::Stop => return None,
                _ => continue,
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

/// Run one call from its `start` frame to the stored result.
///
/// Unknown calls return [`ServerError::NotFound`] without touching the model;
/// dropping `link` then closes the stream.
pub async fn serve_call(
    state: &AppState,
    start: &StreamStart,
    link: TelephonyLink,
) -> Result<CallRecord, ServerError> {
    let call_sid = start
        .correlation_id()
        .ok_or_else(|| ServerError::InvalidRequest("stream start without call id".into()))?;
    let record = state
        .store
        .find_by_provider_sid(call_sid)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("call sid {}", call_sid)))?;

    mark_in_progress(state, &record, &start.stream_sid).await?;
    let pipeline = build_pipeline(state, &record).await;

    let result = pipeline
        .run(state.connector.as_ref(), link, Some(start.stream_sid.clone()))
        .await
        .ok_or_else(|| ServerError::Internal("pipeline finalized twice".into()))?;

    lifecycle::complete_call(state, record.id, result).await
}

/// Session, knowledge, script and instructions for one call, registered
/// under the record id
async fn build_pipeline(state: &AppState, record: &CallRecord) -> VoicePipeline {
    let config = state.get_config();
    let session = CallSession::with_policy(record.id.to_string(), record.lead(), state.policy.clone());

    let knowledge = retrieve_or_empty(
        state.integrations.knowledge.as_ref(),
        &record.course,
        config.knowledge.tenant_id.as_deref(),
        config.knowledge.top_k,
        Duration::from_millis(config.knowledge.timeout_ms),
    )
    .await;
    let script = CallScript::select(&config.scripts, &record.course);
    tracing::debug!(
        call_id = %record.id,
        snippets = knowledge.len(),
        script = ?script.map(|s| s.name.as_str()),
        "Call context loaded"
    );

    let instructions = InstructionBuilder::new(&session)
        .with_persona(state.persona.clone())
        .with_knowledge(&knowledge)
        .with_script(script)
        .realtime_instructions();

    VoicePipeline::new(
        FsmEngine::new(session),
        PipelineConfig::from_settings(&config.realtime, &config.call),
        instructions,
        state.summarizer.clone(),
    )
    .with_registry(state.pipelines.clone())
}

async fn mark_in_progress(
    state: &AppState,
    record: &CallRecord,
    stream_sid: &str,
) -> Result<(), ServerError> {
    let event = CallEvent::new("stream_connected", json!({ "stream_sid": stream_sid }));
    state
        .store
        .update(
            record.id,
            Box::new(move |r: &mut CallRecord| {
                r.apply_status(CallStatus::InProgress, None);
                r.fsm_state = CallState::Opening;
                r.push_event(event);
                Ok(())
            }),
        )
        .await?;
    Ok(())
}
