//! Terminal classification and the persisted call result

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::conversation::{CallState, Turn};

/// Terminal classification of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Qualified,
    NotQualified,
    Scheduled,
    Transferred,
    FollowUp,
    /// Call ended before reaching a terminal conversational state
    Incomplete,
    NoAnswer,
    Busy,
    Error,
}

impl CallOutcome {
    pub const ALL: [CallOutcome; 9] = [
        CallOutcome::Qualified,
        CallOutcome::NotQualified,
        CallOutcome::Scheduled,
        CallOutcome::Transferred,
        CallOutcome::FollowUp,
        CallOutcome::Incomplete,
        CallOutcome::NoAnswer,
        CallOutcome::Busy,
        CallOutcome::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Qualified => "qualified",
            CallOutcome::NotQualified => "not_qualified",
            CallOutcome::Scheduled => "scheduled",
            CallOutcome::Transferred => "transferred",
            CallOutcome::FollowUp => "follow_up",
            CallOutcome::Incomplete => "incomplete",
            CallOutcome::NoAnswer => "no_answer",
            CallOutcome::Busy => "busy",
            CallOutcome::Error => "error",
        }
    }

    /// Outcomes that make the orchestrator dial again
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallOutcome::NoAnswer | CallOutcome::Busy)
    }
}

impl std::fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallOutcome {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CallOutcome::ALL
            .iter()
            .copied()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| crate::Error::UnknownOutcome(s.to_string()))
    }
}

/// How the lead was handed off, if at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffType {
    Schedule,
    WarmTransfer,
    FollowUp,
}

impl HandoffType {
    pub fn from_state(state: CallState) -> Option<Self> {
        match state {
            CallState::Schedule => Some(HandoffType::Schedule),
            CallState::WarmTransfer => Some(HandoffType::WarmTransfer),
            CallState::FollowUp => Some(HandoffType::FollowUp),
            _ => None,
        }
    }
}

/// Terminal projection of a call session, handed to persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub call_id: String,
    pub outcome: CallOutcome,
    pub score: u32,
    pub score_breakdown: BTreeMap<String, u32>,
    pub collected_fields: BTreeMap<String, String>,
    pub objections: Vec<String>,
    pub tags: Vec<String>,
    pub summary: String,
    pub total_turns: u32,
    pub avg_latency_ms: u64,
    pub duration_seconds: u64,
    pub handoff_type: Option<HandoffType>,
    pub final_state: CallState,
    pub transcript: Vec<Turn>,
}

impl CallResult {
    /// Both scheduling fields are present
    pub fn has_meeting_slot(&self) -> bool {
        ["data_agendamento", "hora_agendamento"]
            .iter()
            .all(|f| self.collected_fields.get(*f).is_some_and(|v| !v.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_wire_names() {
        for outcome in CallOutcome::ALL {
            let json = serde_json::to_string(&outcome).unwrap();
            assert_eq!(json, format!("\"{}\"", outcome.as_str()));
            assert_eq!(outcome.as_str().parse::<CallOutcome>().unwrap(), outcome);
        }
        assert!("maybe".parse::<CallOutcome>().is_err());
    }

    #[test]
    fn test_retryable_outcomes() {
        assert!(CallOutcome::NoAnswer.is_retryable());
        assert!(CallOutcome::Busy.is_retryable());
        assert!(!CallOutcome::Error.is_retryable());
        assert!(!CallOutcome::Qualified.is_retryable());
    }

    #[test]
    fn test_handoff_from_state() {
        assert_eq!(
            HandoffType::from_state(CallState::Schedule),
            Some(HandoffType::Schedule)
        );
        assert_eq!(HandoffType::from_state(CallState::Qualify), None);
    }
}
