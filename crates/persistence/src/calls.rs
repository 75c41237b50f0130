//! Call record: one outbound dial attempt and everything learned from it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use voice_qualifier_core::{CallOutcome, CallResult, CallState, HandoffType, LeadInfo, Turn};

use crate::PersistenceError;

/// Provider-side lifecycle of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Queued,
    Initiated,
    Ringing,
    Answered,
    InProgress,
    Completed,
    Busy,
    NoAnswer,
    Failed,
    Canceled,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::Answered => "answered",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Busy => "busy",
            Self::NoAnswer => "no_answer",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// The provider will send no further status for this call
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Busy | Self::NoAnswer | Self::Failed | Self::Canceled
        )
    }

    /// Unanswered statuses map onto a retryable outcome
    pub fn unanswered_outcome(&self) -> Option<CallOutcome> {
        match self {
            Self::Busy => Some(CallOutcome::Busy),
            Self::NoAnswer => Some(CallOutcome::NoAnswer),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts both our names and the provider's hyphenated ones (`no-answer`)
impl FromStr for CallStatus {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "initiated" => Ok(Self::Initiated),
            "ringing" => Ok(Self::Ringing),
            "answered" => Ok(Self::Answered),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "busy" => Ok(Self::Busy),
            "no_answer" => Ok(Self::NoAnswer),
            "failed" => Ok(Self::Failed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            other => Err(PersistenceError::InvalidData(format!(
                "unknown call status '{}'",
                other
            ))),
        }
    }
}

/// Timeline entry attached to a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEvent {
    /// `call_initiated`, `provider_status`, `stream_connected`, `call_completed`, `error`
    pub event: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl CallEvent {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Automatic quality review of a finished call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallQa {
    pub script_adherence: f32,
    pub clarity_score: f32,
    pub fields_completion: f32,
    pub outcome_quality: f32,
    pub overall_score: f32,
    pub avg_latency_ms: u64,
    pub notes: String,
    pub evaluated_at: DateTime<Utc>,
}

/// Persisted call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    /// Provider call id; the stream's correlation key
    pub provider_call_sid: Option<String>,
    pub lead_id: Option<String>,
    pub lead_name: String,
    pub from_number: String,
    pub to_number: String,
    pub course: String,
    pub source: String,
    pub campaign: String,

    pub status: CallStatus,
    pub fsm_state: CallState,

    pub outcome: Option<CallOutcome>,
    pub score: u32,
    pub score_breakdown: BTreeMap<String, u32>,
    pub collected_fields: BTreeMap<String, String>,
    pub objections: Vec<String>,
    pub tags: Vec<String>,
    pub summary: Option<String>,

    pub handoff_type: Option<HandoffType>,
    /// Booking details or transfer target
    pub handoff_data: Option<serde_json::Value>,

    pub duration_seconds: u64,
    pub total_turns: u32,
    pub avg_latency_ms: u64,
    pub recording_url: Option<String>,

    pub attempt_number: u32,
    pub retry_of_call_id: Option<Uuid>,

    pub transcript: Vec<Turn>,
    pub events: Vec<CallEvent>,
    pub qa: Option<CallQa>,
    /// Set once the pipeline result has been stored
    pub result_stored: bool,

    pub started_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// New `pending` first attempt
    pub fn new(lead: &LeadInfo, from_number: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            provider_call_sid: None,
            lead_id: lead.lead_id.clone(),
            lead_name: lead.name.clone(),
            from_number: from_number.into(),
            to_number: lead.phone.clone(),
            course: lead.course.clone(),
            source: lead.source.clone(),
            campaign: lead.campaign.clone(),
            status: CallStatus::Pending,
            fsm_state: CallState::Opening,
            outcome: None,
            score: 0,
            score_breakdown: BTreeMap::new(),
            collected_fields: BTreeMap::new(),
            objections: Vec::new(),
            tags: Vec::new(),
            summary: None,
            handoff_type: None,
            handoff_data: None,
            duration_seconds: 0,
            total_turns: 0,
            avg_latency_ms: 0,
            recording_url: None,
            attempt_number: 1,
            retry_of_call_id: None,
            transcript: Vec::new(),
            events: Vec::new(),
            qa: None,
            result_stored: false,
            started_at: None,
            answered_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Next attempt for the same lead
    pub fn retry(&self) -> Self {
        let mut next = Self::new(&self.lead(), self.from_number.clone());
        next.attempt_number = self.attempt_number + 1;
        next.retry_of_call_id = Some(self.id);
        next
    }

    pub fn lead(&self) -> LeadInfo {
        LeadInfo {
            lead_id: self.lead_id.clone(),
            name: self.lead_name.clone(),
            phone: self.to_number.clone(),
            course: self.course.clone(),
            source: self.source.clone(),
            campaign: self.campaign.clone(),
        }
    }

    /// Apply a provider status callback
    pub fn apply_status(&mut self, status: CallStatus, duration_seconds: Option<u64>) {
        self.status = status;
        if let Some(duration) = duration_seconds {
            self.duration_seconds = duration;
        }
        let now = Utc::now();
        match status {
            CallStatus::Answered | CallStatus::InProgress if self.answered_at.is_none() => {
                self.answered_at = Some(now);
            }
            s if s.is_terminal() => self.ended_at = Some(now),
            _ => {}
        }
    }

    /// Whether an operator already bridged the call to a closer
    pub fn is_operator_transfer(&self) -> bool {
        self.outcome == Some(CallOutcome::Transferred)
            && self.handoff_type == Some(HandoffType::WarmTransfer)
    }

    /// Copy the pipeline result in. Only the first call succeeds.
    ///
    /// An operator transfer recorded earlier keeps its outcome and handoff.
    pub fn apply_result(&mut self, result: &CallResult) -> Result<(), PersistenceError> {
        if self.result_stored {
            return Err(PersistenceError::AlreadyFinalized(self.id));
        }
        let transferred = self.is_operator_transfer();
        self.outcome = Some(result.outcome);
        self.score = result.score;
        self.score_breakdown = result.score_breakdown.clone();
        self.collected_fields = result.collected_fields.clone();
        self.objections = result.objections.clone();
        self.tags = result.tags.clone();
        self.summary = Some(result.summary.clone());
        self.total_turns = result.total_turns;
        self.avg_latency_ms = result.avg_latency_ms;
        self.duration_seconds = result.duration_seconds;
        self.handoff_type = result.handoff_type;
        if transferred {
            self.outcome = Some(CallOutcome::Transferred);
            self.handoff_type = Some(HandoffType::WarmTransfer);
        }
        self.fsm_state = result.final_state;
        self.transcript = result.transcript.clone();
        self.ended_at = Some(Utc::now());
        self.result_stored = true;
        self.events.push(CallEvent::new(
            "call_completed",
            serde_json::json!({
                "outcome": self.outcome.unwrap_or(result.outcome).as_str(),
                "score": result.score,
                "final_state": result.final_state.as_str(),
            }),
        ));
        Ok(())
    }

    pub fn push_event(&mut self, event: CallEvent) {
        self.events.push(event);
    }
}
