//! In-memory state of one call
//!
//! Queries here are pure and mutators never fail: values coming from the
//! model are filtered, not rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::conversation::{CallState, Turn, TurnRole};
use crate::policy::{QualificationPolicy, NO_OBJECTION_KEY};

/// Who is being called and why
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadInfo {
    /// External CRM id, when the lead came from the CRM
    pub lead_id: Option<String>,
    pub name: String,
    pub phone: String,
    /// Course or topic of interest
    pub course: String,
    pub source: String,
    pub campaign: String,
}

impl LeadInfo {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            ..Default::default()
        }
    }

    pub fn with_course(mut self, course: impl Into<String>) -> Self {
        self.course = course.into();
        self
    }

    /// First name, used by spoken lines
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }
}

/// Score with its per-condition breakdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadScore {
    /// 0..=100
    pub total: u32,
    pub breakdown: BTreeMap<String, u32>,
}

/// Mutable state of one active call
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub call_id: String,
    pub lead: LeadInfo,

    pub state: CallState,
    pub previous_state: Option<CallState>,

    pub collected_fields: BTreeMap<String, String>,
    pub objections: Vec<String>,
    pub tags: Vec<String>,
    pub history: Vec<Turn>,

    /// User turns only
    pub turn_count: u32,
    pub cumulative_latency_ms: u64,
    pub qualify_retries: u32,
    pub objection_count: u32,
    pub barge_in_count: u32,
    pub handoff_reason: Option<String>,

    pub started_at: DateTime<Utc>,
    pub is_active: bool,

    #[serde(skip)]
    policy: Arc<QualificationPolicy>,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>, lead: LeadInfo) -> Self {
        Self::with_policy(call_id, lead, Arc::new(QualificationPolicy::default()))
    }

    pub fn with_policy(
        call_id: impl Into<String>,
        lead: LeadInfo,
        policy: Arc<QualificationPolicy>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            lead,
            state: CallState::default(),
            previous_state: None,
            collected_fields: BTreeMap::new(),
            objections: Vec::new(),
            tags: Vec::new(),
            history: Vec::new(),
            turn_count: 0,
            cumulative_latency_ms: 0,
            qualify_retries: 0,
            objection_count: 0,
            barge_in_count: 0,
            handoff_reason: None,
            started_at: Utc::now(),
            is_active: true,
            policy,
        }
    }

    pub fn policy(&self) -> &QualificationPolicy {
        &self.policy
    }

    /// Required fields of the current state not yet collected, in policy order
    pub fn get_missing_fields(&self) -> Vec<String> {
        self.missing_fields_for(self.state)
    }

    pub fn missing_fields_for(&self, state: CallState) -> Vec<String> {
        self.policy
            .required_for(state)
            .iter()
            .filter(|field| !self.collected_fields.contains_key(field.as_str()))
            .cloned()
            .collect()
    }

    pub fn can_advance(&self) -> bool {
        self.get_missing_fields().is_empty()
    }

    pub fn calculate_score(&self) -> LeadScore {
        let mut breakdown = BTreeMap::new();
        let mut total = 0u32;

        for weight in &self.policy.score_weights {
            let earned = if weight.name == NO_OBJECTION_KEY {
                let count = u32::try_from(self.objections.len()).unwrap_or(u32::MAX);
                let penalty = self.policy.objection_penalty.saturating_mul(count);
                weight.points.saturating_sub(penalty)
            } else if self.collected_fields.contains_key(&weight.name) {
                weight.points
            } else {
                0
            };
            breakdown.insert(weight.name.clone(), earned);
            total = total.saturating_add(earned);
        }

        LeadScore {
            total: total.min(100),
            breakdown,
        }
    }

    /// Merge extracted fields; returns the keys that were stored.
    ///
    /// Empty values and keys outside the field vocabulary are dropped.
    pub fn update_fields<I, K, V>(&mut self, fields: I) -> Vec<String>
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut stored = Vec::new();
        for (key, value) in fields {
            let key = key.into();
            let Some(value) = value.map(Into::into) else {
                continue;
            };
            if value.trim().is_empty() || !self.policy.is_known_field(&key) {
                continue;
            }
            if key == "handoff_reason" {
                self.handoff_reason = Some(value.clone());
            }
            self.collected_fields.insert(key.clone(), value);
            stored.push(key);
        }
        stored
    }

    /// Register an objection; returns false for blanks and duplicates
    pub fn add_objection(&mut self, objection: &str) -> bool {
        let objection = objection.trim();
        if objection.is_empty() || self.objections.iter().any(|o| o == objection) {
            return false;
        }
        self.objections.push(objection.to_string());
        self.objection_count += 1;
        true
    }

    pub fn add_turn(&mut self, role: TurnRole, text: &str) {
        self.push_turn(Turn::new(role, text, self.state));
    }

    pub fn add_turn_with_latency(&mut self, role: TurnRole, text: &str, latency_ms: u64) {
        self.cumulative_latency_ms += latency_ms;
        self.push_turn(Turn::new(role, text, self.state).with_latency(latency_ms));
    }

    fn push_turn(&mut self, turn: Turn) {
        if turn.text.trim().is_empty() {
            return;
        }
        if turn.role == TurnRole::User {
            self.turn_count += 1;
        }
        self.history.push(turn);
    }

    /// Append a tag unless it is already present
    pub fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    /// Latest `n` turns, oldest first
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn average_latency_ms(&self) -> u64 {
        let measured = self
            .history
            .iter()
            .filter(|t| t.latency_ms.is_some())
            .count() as u64;
        if measured == 0 {
            0
        } else {
            self.cumulative_latency_ms / measured
        }
    }

    pub fn elapsed_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}
