//! Call states and conversation turns

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Conversational phase of a qualification call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    /// Introduction and permission to talk
    #[default]
    Opening,
    /// Confirming interest in the course
    Context,
    /// Collecting the mandatory qualification fields
    Qualify,
    /// Empathy-first objection handling
    HandleObjection,
    /// Booking a meeting with a consultant
    Schedule,
    /// Live hand-off to a human
    WarmTransfer,
    /// Deferred contact via messaging
    FollowUp,
    /// Goodbye; terminal
    Close,
}

static TRANSITIONS: Lazy<HashMap<CallState, &'static [CallState]>> = Lazy::new(|| {
    use CallState::*;
    let mut map = HashMap::new();
    map.insert(Opening, &[Context, Close] as &[_]);
    map.insert(Context, &[Qualify, Close] as &[_]);
    map.insert(
        Qualify,
        &[HandleObjection, Schedule, WarmTransfer, FollowUp, Close] as &[_],
    );
    map.insert(
        HandleObjection,
        &[Qualify, Schedule, WarmTransfer, FollowUp, Close] as &[_],
    );
    map.insert(Schedule, &[Close] as &[_]);
    map.insert(WarmTransfer, &[Close] as &[_]);
    map.insert(FollowUp, &[Close] as &[_]);
    map.insert(Close, &[] as &[_]);
    map
});

impl CallState {
    /// Every state, in declaration order
    pub const ALL: [CallState; 8] = [
        CallState::Opening,
        CallState::Context,
        CallState::Qualify,
        CallState::HandleObjection,
        CallState::Schedule,
        CallState::WarmTransfer,
        CallState::FollowUp,
        CallState::Close,
    ];

    /// Targets reachable from this state
    pub fn valid_transitions(&self) -> &'static [CallState] {
        TRANSITIONS.get(self).copied().unwrap_or(&[])
    }

    pub fn can_transition_to(&self, target: CallState) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Natural forward step used by the `advance` action.
    ///
    /// States without a forward step fall through to `Close`.
    pub fn natural_next(&self) -> CallState {
        match self {
            CallState::Opening => CallState::Context,
            CallState::Context => CallState::Qualify,
            CallState::Qualify => CallState::Schedule,
            CallState::HandleObjection => CallState::Qualify,
            _ => CallState::Close,
        }
    }

    /// Wire name (`OPENING`, `HANDLE_OBJECTION`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Opening => "OPENING",
            CallState::Context => "CONTEXT",
            CallState::Qualify => "QUALIFY",
            CallState::HandleObjection => "HANDLE_OBJECTION",
            CallState::Schedule => "SCHEDULE",
            CallState::WarmTransfer => "WARM_TRANSFER",
            CallState::FollowUp => "FOLLOW_UP",
            CallState::Close => "CLOSE",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        CallState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| crate::Error::UnknownState(s.to_string()))
    }
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The lead on the phone
    User,
    /// The voice agent
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single transcribed utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    /// State the call was in when the turn was recorded
    pub fsm_state: CallState,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Set on assistant turns that the lead talked over
    #[serde(default)]
    pub barge_in: bool,
}

impl Turn {
    pub fn new(role: TurnRole, text: impl Into<String>, fsm_state: CallState) -> Self {
        Self {
            role,
            text: text.into(),
            fsm_state,
            timestamp: Utc::now(),
            latency_ms: None,
            barge_in: false,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}
