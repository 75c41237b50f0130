//! Call lifecycle
//!
//! ## Flow
//!
//! 1. Lead intake creates a `pending` record and dials in the background
//! 2. Provider status callbacks move the record; busy and unanswered calls
//!    are redialed on the retry schedule
//! 3. The media stream runs the relay (see [`crate::stream`])
//! 4. After finalize: persist once, post-call actions, QA review
//!
//! Post-call actions are best effort. Each failure is logged and the
//! remaining actions still run.

use chrono::Utc;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use uuid::Uuid;

use voice_qualifier_core::{CallOutcome, CallResult, HandoffType, LeadInfo};
use voice_qualifier_integrations::{
    follow_up_text, funnel_stage, schedule_confirmation_text, CrmCallReport, DialRequest,
    MeetingRequest,
};
use voice_qualifier_persistence::{CallEvent, CallQa, CallRecord, CallStatus};

use crate::phone::normalize_phone;
use crate::state::AppState;
use crate::twiml;
use crate::ServerError;

/// Lead intake body
#[derive(Debug, Clone, Deserialize)]
pub struct NewLead {
    #[serde(default)]
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub campaign: Option<String>,
    /// CRM id; numeric ids are accepted
    #[serde(default, deserialize_with = "string_or_number")]
    pub lead_id: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Provider status webhook form
#[derive(Debug, Clone, Deserialize)]
pub struct StatusCallback {
    #[serde(rename = "CallSid", default)]
    pub call_sid: String,
    #[serde(rename = "CallStatus", default)]
    pub call_status: String,
    #[serde(rename = "CallDuration", default)]
    pub call_duration: Option<String>,
}

/// Record lookup that treats absence as an error
pub async fn get_call(state: &AppState, id: Uuid) -> Result<CallRecord, ServerError> {
    state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("call {}", id)))
}

/// Validated lead: a name is required and the phone is normalized
pub fn lead_info(state: &AppState, lead: NewLead) -> Result<LeadInfo, ServerError> {
    let name = lead.name.trim();
    if name.is_empty() {
        return Err(ServerError::InvalidRequest("name is required".into()));
    }
    let phone = normalize_phone(&lead.phone, &state.config.telephony.default_country_code)?;

    Ok(LeadInfo {
        lead_id: lead.lead_id,
        name: name.to_string(),
        phone,
        course: lead.course.unwrap_or_default(),
        source: lead.source.unwrap_or_default(),
        campaign: lead.campaign.unwrap_or_default(),
    })
}

/// Create the `pending` record for a new lead. Dialing is separate, see [`spawn_dial`].
pub async fn create_call(state: &AppState, lead: NewLead) -> Result<CallRecord, ServerError> {
    let config = state.get_config();
    let info = lead_info(state, lead)?;

    let mut record = CallRecord::new(&info, config.telephony.from_number.clone());
    record.push_event(CallEvent::new(
        "lead_received",
        json!({ "lead_id": info.lead_id, "course": info.course }),
    ));
    state.store.create(record.clone()).await?;

    tracing::info!(
        call_id = %record.id,
        lead = %record.lead_name,
        to = %record.to_number,
        "Call created"
    );
    Ok(record)
}

/// Dial in the background; the intake response does not wait for the provider
pub fn spawn_dial(state: AppState, id: Uuid) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = dial(&state, id).await {
            tracing::error!(call_id = %id, error = %e, "Dial bookkeeping failed");
        }
    })
}

/// Place the call. A provider failure marks the record `failed` with outcome
/// `error`; only store failures are returned.
pub async fn dial(state: &AppState, id: Uuid) -> Result<(), ServerError> {
    let record = get_call(state, id).await?;
    let request = DialRequest::from_settings(&state.config.telephony, record.to_number.clone());

    match state.integrations.dialer.dial(&request).await {
        Ok(sid) => {
            state.store.set_provider_sid(id, &sid).await?;
            let event = CallEvent::new(
                "call_initiated",
                json!({ "call_sid": sid, "to": request.to }),
            );
            state
                .store
                .update(
                    id,
                    Box::new(move |r: &mut CallRecord| {
                        // Provider callbacks may already have moved the status
                        if matches!(r.status, CallStatus::Pending | CallStatus::Queued) {
                            r.apply_status(CallStatus::Initiated, None);
                        }
                        r.started_at = Some(Utc::now());
                        r.push_event(event);
                        Ok(())
                    }),
                )
                .await?;
            tracing::info!(call_id = %id, call_sid = %sid, attempt = record.attempt_number, "Call dialed");
        }
        Err(e) => {
            tracing::error!(call_id = %id, error = %e, "Dial failed");
            let event = CallEvent::new("error", json!({ "error": e.to_string() }));
            state
                .store
                .update(
                    id,
                    Box::new(move |r: &mut CallRecord| {
                        r.apply_status(CallStatus::Failed, None);
                        r.outcome = Some(CallOutcome::Error);
                        r.push_event(event);
                        Ok(())
                    }),
                )
                .await?;
        }
    }
    Ok(())
}

/// Apply a provider status callback.
///
/// Busy and unanswered calls get their outcome set; a redial is scheduled
/// while attempts remain. Unknown calls and statuses are ignored.
pub async fn handle_status(state: &AppState, callback: StatusCallback) -> Result<(), ServerError> {
    let status: CallStatus = match callback.call_status.parse() {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(call_sid = %callback.call_sid, error = %e, "Ignoring status callback");
            return Ok(());
        }
    };
    let Some(record) = state.store.find_by_provider_sid(&callback.call_sid).await? else {
        tracing::debug!(call_sid = %callback.call_sid, status = %status, "Status for unknown call");
        return Ok(());
    };

    let duration = callback
        .call_duration
        .as_deref()
        .and_then(|d| d.trim().parse::<u64>().ok());
    let repeated = record.status == status;
    let event = CallEvent::new(
        "provider_status",
        json!({ "status": status.as_str(), "duration": duration }),
    );

    let updated = state
        .store
        .update(
            record.id,
            Box::new(move |r: &mut CallRecord| {
                r.apply_status(status, duration);
                if let Some(outcome) = status.unanswered_outcome() {
                    r.outcome = Some(outcome);
                }
                r.push_event(event);
                Ok(())
            }),
        )
        .await?;

    tracing::info!(
        call_id = %updated.id,
        call_sid = %callback.call_sid,
        status = %status,
        duration_secs = ?duration,
        "Call status"
    );

    if status.unanswered_outcome().is_some()
        && !repeated
        && state.config.retry.should_retry(updated.attempt_number)
    {
        schedule_retry(state.clone(), updated);
    }
    Ok(())
}

/// Redial after the configured delay as a new record linked to `record`
pub fn schedule_retry(state: AppState, record: CallRecord) -> tokio::task::JoinHandle<()> {
    let delay = state.config.retry.delay_for_attempt(record.attempt_number);
    metrics::counter!("voice_retries_scheduled_total").increment(1);
    tracing::info!(
        call_id = %record.id,
        next_attempt = record.attempt_number + 1,
        delay_secs = delay.as_secs(),
        "Retry scheduled"
    );

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let next = record.retry();
        let id = next.id;
        if let Err(e) = state.store.create(next).await {
            tracing::error!(retry_of = %record.id, error = %e, "Retry record not created");
            return;
        }
        if let Err(e) = dial(&state, id).await {
            tracing::error!(call_id = %id, error = %e, "Retry dial failed");
        }
    })
}

/// Store the recording URL announced by the provider
pub async fn store_recording(
    state: &AppState,
    call_sid: &str,
    recording_url: &str,
) -> Result<(), ServerError> {
    if recording_url.trim().is_empty() {
        return Ok(());
    }
    let Some(record) = state.store.find_by_provider_sid(call_sid).await? else {
        return Ok(());
    };
    let url = format!("{}.mp3", recording_url.trim());
    state
        .store
        .update(
            record.id,
            Box::new(move |r: &mut CallRecord| {
                r.recording_url = Some(url);
                Ok(())
            }),
        )
        .await?;
    Ok(())
}

/// Warm transfer to a closer.
///
/// A live relay is moved to WARM_TRANSFER through the registry first; if its
/// conversation cannot hand off yet the transfer is refused and nothing else
/// changes. Then the provider bridges the call.
pub async fn transfer(state: &AppState, id: Uuid) -> Result<(), ServerError> {
    let record = get_call(state, id).await?;
    let sid = record
        .provider_call_sid
        .ok_or_else(|| ServerError::InvalidRequest("call was never dialed".into()))?;

    if let Some(handle) = state.pipelines.get(&id.to_string()) {
        if let Err(e) = handle.request_transfer("transferência manual") {
            tracing::warn!(call_id = %id, state = %handle.state(), error = %e, "Pipeline refused transfer");
            return Err(ServerError::Conflict(e.to_string()));
        }
    }

    let target = state.config.telephony.transfer_target().to_string();
    state
        .integrations
        .dialer
        .redirect(&sid, &twiml::warm_transfer(&target))
        .await?;

    state
        .store
        .update(
            id,
            Box::new(move |r: &mut CallRecord| {
                r.handoff_type = Some(HandoffType::WarmTransfer);
                r.outcome = Some(CallOutcome::Transferred);
                r.push_event(CallEvent::new("transferred", json!({ "target": target })));
                Ok(())
            }),
        )
        .await?;
    tracing::info!(call_id = %id, call_sid = %sid, "Call transferred");
    Ok(())
}

/// Hang up a live call
pub async fn end(state: &AppState, id: Uuid) -> Result<(), ServerError> {
    let record = get_call(state, id).await?;
    let sid = record
        .provider_call_sid
        .ok_or_else(|| ServerError::InvalidRequest("call was never dialed".into()))?;
    state.integrations.dialer.hangup(&sid).await?;
    state
        .store
        .update(
            id,
            Box::new(|r: &mut CallRecord| {
                r.push_event(CallEvent::new("ended_by_operator", Value::Null));
                Ok(())
            }),
        )
        .await?;
    tracing::info!(call_id = %id, call_sid = %sid, "Call ended by operator");
    Ok(())
}

/// Everything that happens after the relay finalized
pub async fn complete_call(
    state: &AppState,
    id: Uuid,
    result: CallResult,
) -> Result<CallRecord, ServerError> {
    let record = save_results(state, id, &result).await?;
    post_call_actions(state, &record).await;
    review_quality(state, id, &result).await;
    Ok(record)
}

/// Persist the result; a second save for the same call is rejected
pub async fn save_results(
    state: &AppState,
    id: Uuid,
    result: &CallResult,
) -> Result<CallRecord, ServerError> {
    let result = result.clone();
    let record = state
        .store
        .update(id, Box::new(move |r: &mut CallRecord| r.apply_result(&result)))
        .await?;
    tracing::info!(
        call_id = %id,
        outcome = ?record.outcome,
        score = record.score,
        turns = record.total_turns,
        "Call results saved"
    );
    Ok(record)
}

fn crm_report(state: &AppState, record: &CallRecord, outcome: CallOutcome) -> CrmCallReport {
    CrmCallReport {
        lead_id: record.lead_id.clone(),
        lead_name: record.lead_name.clone(),
        phone: record.to_number.clone(),
        course: record.course.clone(),
        agent_name: state.persona.name.clone(),
        outcome,
        score: record.score,
        duration_seconds: record.duration_seconds,
        collected_fields: record.collected_fields.clone(),
        objections: record.objections.clone(),
        summary: record.summary.clone().unwrap_or_default(),
        ended_at: record.ended_at.unwrap_or_else(Utc::now),
    }
}

/// CRM update, meeting booking, lead messages and funnel move
pub async fn post_call_actions(state: &AppState, record: &CallRecord) {
    let outcome = record.outcome.unwrap_or(CallOutcome::Incomplete);
    let integrations = &state.integrations;
    let messages_enabled = state.config.messaging.followup_enabled;

    if let Err(e) = integrations
        .crm
        .record_call(&crm_report(state, record, outcome))
        .await
    {
        tracing::error!(call_id = %record.id, error = %e, "CRM update failed");
    }

    let date = record.collected_fields.get("data_agendamento");
    let time = record.collected_fields.get("hora_agendamento");
    match (outcome, date, time) {
        (CallOutcome::Scheduled, Some(date), Some(time)) if !date.is_empty() && !time.is_empty() => {
            let lead_name = if record.lead_name.is_empty() {
                "Lead"
            } else {
                &record.lead_name
            };
            let request =
                MeetingRequest::new(lead_name, &record.to_number, &record.course, date, time)
                    .with_duration(state.config.scheduling.meeting_minutes);
            match integrations.scheduler.schedule(&request).await {
                Ok(booking) => {
                    tracing::info!(
                        call_id = %record.id,
                        event_id = %booking.event_id,
                        local = booking.is_local(),
                        "Meeting booked"
                    );
                    let data = serde_json::to_value(&booking).unwrap_or(Value::Null);
                    if let Err(e) = state
                        .store
                        .update(
                            record.id,
                            Box::new(move |r: &mut CallRecord| {
                                r.handoff_data = Some(data);
                                Ok(())
                            }),
                        )
                        .await
                    {
                        tracing::error!(call_id = %record.id, error = %e, "Booking not stored");
                    }

                    if booking.is_local() {
                        tracing::warn!(call_id = %record.id, "Booking not on a calendar, confirmation skipped");
                    } else if messages_enabled {
                        let text = schedule_confirmation_text(
                            lead_name,
                            &record.course,
                            &booking.date,
                            &booking.time,
                        );
                        if let Err(e) = integrations.messenger.send_text(&record.to_number, &text).await {
                            tracing::error!(call_id = %record.id, error = %e, "Confirmation not sent");
                        }
                    }
                }
                Err(e) => tracing::error!(call_id = %record.id, error = %e, "Scheduling failed"),
            }
        }
        (CallOutcome::FollowUp, _, _) if messages_enabled => {
            let text = follow_up_text(&record.lead_name, &state.persona.name, &record.course);
            if let Err(e) = integrations.messenger.send_text(&record.to_number, &text).await {
                tracing::error!(call_id = %record.id, error = %e, "Follow-up not sent");
            }
        }
        _ => {}
    }

    if let (Some(lead_id), Some(stage)) = (&record.lead_id, funnel_stage(outcome)) {
        if let Err(e) = integrations.crm.move_in_funnel(lead_id, stage).await {
            tracing::error!(call_id = %record.id, error = %e, "Funnel move failed");
        }
    }
}

/// Grade the call and attach the review; skipped when QA is disabled
async fn review_quality(state: &AppState, id: Uuid, result: &CallResult) {
    let Some(evaluator) = &state.qa else {
        return;
    };
    let Some(scores) = evaluator.evaluate(result).await else {
        return;
    };
    let qa = CallQa {
        script_adherence: scores.script_adherence as f32,
        clarity_score: scores.clarity_score as f32,
        fields_completion: scores.fields_completion as f32,
        outcome_quality: scores.outcome_quality as f32,
        overall_score: scores.overall_score as f32,
        avg_latency_ms: scores.avg_latency_ms,
        notes: scores.notes,
        evaluated_at: Utc::now(),
    };
    tracing::info!(call_id = %id, overall = qa.overall_score, "QA review stored");
    if let Err(e) = state
        .store
        .update(
            id,
            Box::new(move |r: &mut CallRecord| {
                r.qa = Some(qa);
                Ok(())
            }),
        )
        .await
    {
        tracing::error!(call_id = %id, error = %e, "QA review not stored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lead_accepts_numeric_lead_id() {
        let lead: NewLead =
            serde_json::from_value(json!({"name": "Ana", "phone": "11999990000", "lead_id": 42}))
                .unwrap();
        assert_eq!(lead.lead_id.as_deref(), Some("42"));

        let lead: NewLead =
            serde_json::from_value(json!({"name": "Ana", "phone": "1", "lead_id": ""})).unwrap();
        assert_eq!(lead.lead_id, None);

        let lead: NewLead =
            serde_json::from_value(json!({"name": "Ana", "phone": "1"})).unwrap();
        assert_eq!(lead.lead_id, None);
        assert_eq!(lead.course, None);
    }
}
