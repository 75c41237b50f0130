//! State machine engine over a [`CallSession`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

use crate::conversation::{CallState, TurnRole};
use crate::outcome::{CallOutcome, CallResult, HandoffType};
use crate::session::{CallSession, LeadScore};

/// Tag recorded when QUALIFY is left with required fields still missing
pub const QUALIFY_INCOMPLETE_TAG: &str = "qualify_incomplete";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsmError {
    #[error("Invalid transition {from} -> {to}")]
    InvalidTransition { from: CallState, to: CallState },
}

/// One executed transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: CallState,
    pub to: CallState,
    pub reason: Option<String>,
    /// Left QUALIFY with required fields missing
    pub incomplete: bool,
    pub timestamp: DateTime<Utc>,
}

/// Action vocabulary the model may suggest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolicAction {
    Continue,
    Advance,
    HandleObjection,
    Schedule,
    Transfer,
    FollowUp,
    EndCall,
}

impl SymbolicAction {
    pub const ALL: [SymbolicAction; 7] = [
        SymbolicAction::Continue,
        SymbolicAction::Advance,
        SymbolicAction::HandleObjection,
        SymbolicAction::Schedule,
        SymbolicAction::Transfer,
        SymbolicAction::FollowUp,
        SymbolicAction::EndCall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolicAction::Continue => "continue",
            SymbolicAction::Advance => "advance",
            SymbolicAction::HandleObjection => "handle_objection",
            SymbolicAction::Schedule => "schedule",
            SymbolicAction::Transfer => "transfer",
            SymbolicAction::FollowUp => "follow_up",
            SymbolicAction::EndCall => "end_call",
        }
    }
}

impl std::fmt::Display for SymbolicAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolicAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SymbolicAction::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s.trim())
            .ok_or(())
    }
}

/// Snapshot of a session for logging and persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub state: CallState,
    pub score: u32,
    pub score_breakdown: BTreeMap<String, u32>,
    pub collected_fields: BTreeMap<String, String>,
    pub objections: Vec<String>,
    pub tags: Vec<String>,
    pub turn_count: u32,
    pub objection_count: u32,
    pub barge_in_count: u32,
}

/// Validates and executes transitions; the only writer of `session.state`
#[derive(Debug, Clone)]
pub struct FsmEngine {
    session: CallSession,
    transitions: Vec<TransitionRecord>,
}

impl FsmEngine {
    pub fn new(session: CallSession) -> Self {
        Self {
            session,
            transitions: Vec::new(),
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn into_session(self) -> CallSession {
        self.session
    }

    pub fn state(&self) -> CallState {
        self.session.state
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Move to `target` if the edge exists.
    ///
    /// Leaving QUALIFY for anything but HANDLE_OBJECTION or CLOSE while fields
    /// are missing is allowed and tagged `qualify_incomplete`.
    pub fn transition(
        &mut self,
        target: CallState,
        reason: Option<&str>,
    ) -> Result<TransitionRecord, FsmError> {
        let current = self.session.state;
        if !current.can_transition_to(target) {
            tracing::warn!(
                call_id = %self.session.call_id,
                from = %current,
                to = %target,
                "Rejected invalid transition"
            );
            return Err(FsmError::InvalidTransition {
                from: current,
                to: target,
            });
        }

        let mut incomplete = false;
        if current == CallState::Qualify
            && !matches!(target, CallState::HandleObjection | CallState::Close)
            && !self.session.can_advance()
        {
            incomplete = true;
            tracing::info!(
                call_id = %self.session.call_id,
                missing = ?self.session.get_missing_fields(),
                "Leaving QUALIFY with missing fields"
            );
            self.session.add_tag(QUALIFY_INCOMPLETE_TAG);
        }
        if target == CallState::Qualify && current == CallState::HandleObjection {
            self.session.qualify_retries += 1;
        }

        self.session.previous_state = Some(current);
        self.session.state = target;
        if target == CallState::Close {
            self.session.is_active = false;
        }

        let record = TransitionRecord {
            from: current,
            to: target,
            reason: reason.map(str::to_string),
            incomplete,
            timestamp: Utc::now(),
        };
        tracing::debug!(
            call_id = %self.session.call_id,
            from = %current,
            to = %target,
            reason = ?record.reason,
            "State transition"
        );
        self.transitions.push(record.clone());
        Ok(record)
    }

    /// Resolve a symbolic action to a target state.
    ///
    /// Unknown actions keep the current state.
    pub fn get_next_action(&self, action: &str) -> CallState {
        match action.parse::<SymbolicAction>() {
            Ok(action) => self.target_for(action),
            Err(()) => self.session.state,
        }
    }

    pub fn target_for(&self, action: SymbolicAction) -> CallState {
        match action {
            SymbolicAction::Continue => self.session.state,
            SymbolicAction::Advance => self.session.state.natural_next(),
            SymbolicAction::HandleObjection => CallState::HandleObjection,
            SymbolicAction::Schedule => CallState::Schedule,
            SymbolicAction::Transfer => CallState::WarmTransfer,
            SymbolicAction::FollowUp => CallState::FollowUp,
            SymbolicAction::EndCall => CallState::Close,
        }
    }

    /// Transition according to `action`; `Ok(None)` when it resolves to the current state
    pub fn apply_action(&mut self, action: &str) -> Result<Option<TransitionRecord>, FsmError> {
        let target = self.get_next_action(action);
        if target == self.session.state {
            return Ok(None);
        }
        self.transition(target, Some(action)).map(Some)
    }

    pub fn update_fields<I, K, V>(&mut self, fields: I) -> Vec<String>
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.session.update_fields(fields)
    }

    pub fn add_objection(&mut self, objection: &str) -> bool {
        self.session.add_objection(objection)
    }

    pub fn add_turn(&mut self, role: TurnRole, text: &str) {
        self.session.add_turn(role, text);
    }

    pub fn add_turn_with_latency(&mut self, role: TurnRole, text: &str, latency_ms: u64) {
        self.session.add_turn_with_latency(role, text, latency_ms);
    }

    /// Mark the latest assistant turn as talked over
    pub fn record_barge_in(&mut self) {
        self.session.barge_in_count += 1;
        if let Some(turn) = self
            .session
            .history
            .iter_mut()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
        {
            turn.barge_in = true;
        }
    }

    pub fn add_tag(&mut self, tag: &str) {
        self.session.add_tag(tag);
    }

    pub fn set_handoff_reason(&mut self, reason: &str) {
        self.session
            .update_fields([("handoff_reason", Some(reason.to_string()))]);
    }

    pub fn calculate_score(&self) -> LeadScore {
        self.session.calculate_score()
    }

    pub fn determine_outcome(&self) -> CallOutcome {
        match self.session.state {
            CallState::Schedule => CallOutcome::Scheduled,
            CallState::WarmTransfer => CallOutcome::Transferred,
            CallState::FollowUp => CallOutcome::FollowUp,
            CallState::Close => {
                if self.session.calculate_score().total >= self.session.policy().qualified_threshold
                {
                    CallOutcome::Qualified
                } else {
                    CallOutcome::NotQualified
                }
            }
            _ => CallOutcome::Incomplete,
        }
    }

    pub fn handoff_type(&self) -> Option<HandoffType> {
        HandoffType::from_state(self.session.state)
    }

    pub fn session_summary(&self) -> SessionSummary {
        let score = self.session.calculate_score();
        SessionSummary {
            state: self.session.state,
            score: score.total,
            score_breakdown: score.breakdown,
            collected_fields: self.session.collected_fields.clone(),
            objections: self.session.objections.clone(),
            tags: self.session.tags.clone(),
            turn_count: self.session.turn_count,
            objection_count: self.session.objection_count,
            barge_in_count: self.session.barge_in_count,
        }
    }

    /// Terminal projection of the session
    pub fn build_result(&self, summary: String, duration_seconds: u64) -> CallResult {
        let score = self.session.calculate_score();
        CallResult {
            call_id: self.session.call_id.clone(),
            outcome: self.determine_outcome(),
            score: score.total,
            score_breakdown: score.breakdown,
            collected_fields: self.session.collected_fields.clone(),
            objections: self.session.objections.clone(),
            tags: self.session.tags.clone(),
            summary,
            total_turns: self.session.turn_count,
            avg_latency_ms: self.session.average_latency_ms(),
            duration_seconds,
            handoff_type: self.handoff_type(),
            final_state: self.session.state,
            transcript: self.session.history.clone(),
        }
    }
}
