//! Qualification policy: required fields per state and the score model
//!
//! Both tables are data so deployments can tune them; the defaults reproduce
//! the production values (six weighted conditions, 60-point threshold).

use serde::{Deserialize, Serialize};

use crate::conversation::CallState;

/// Condition awarded when the lead raised no objection
pub const NO_OBJECTION_KEY: &str = "sem_objecao";

/// Fields collected outside the required/weighted tables but still accepted
pub const EXTRA_FIELDS: &[&str] = &["formacao", "atuacao", "motivacao"];

/// Required fields, one list per state
///
/// A struct instead of a map so every state is always covered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequiredFields {
    pub opening: Vec<String>,
    pub context: Vec<String>,
    pub qualify: Vec<String>,
    pub handle_objection: Vec<String>,
    pub schedule: Vec<String>,
    pub warm_transfer: Vec<String>,
    pub follow_up: Vec<String>,
    pub close: Vec<String>,
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

impl Default for RequiredFields {
    fn default() -> Self {
        Self {
            opening: Vec::new(),
            context: owned(&["confirmed_interest"]),
            qualify: owned(&["objetivo", "prazo", "disponibilidade", "forma_pagamento"]),
            handle_objection: Vec::new(),
            schedule: owned(&["data_agendamento", "hora_agendamento"]),
            warm_transfer: owned(&["handoff_reason"]),
            follow_up: Vec::new(),
            close: Vec::new(),
        }
    }
}

impl RequiredFields {
    pub fn for_state(&self, state: CallState) -> &[String] {
        match state {
            CallState::Opening => &self.opening,
            CallState::Context => &self.context,
            CallState::Qualify => &self.qualify,
            CallState::HandleObjection => &self.handle_objection,
            CallState::Schedule => &self.schedule,
            CallState::WarmTransfer => &self.warm_transfer,
            CallState::FollowUp => &self.follow_up,
            CallState::Close => &self.close,
        }
    }

    fn all(&self) -> impl Iterator<Item = &String> {
        CallState::ALL
            .iter()
            .flat_map(move |state| self.for_state(*state).iter())
    }
}

/// One weighted scoring condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeight {
    pub name: String,
    pub points: u32,
}

impl ScoreWeight {
    pub fn new(name: impl Into<String>, points: u32) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }
}

fn default_score_weights() -> Vec<ScoreWeight> {
    vec![
        ScoreWeight::new("confirmed_interest", 20),
        ScoreWeight::new("objetivo", 15),
        ScoreWeight::new("prazo", 15),
        ScoreWeight::new("disponibilidade", 15),
        ScoreWeight::new("forma_pagamento", 20),
        ScoreWeight::new(NO_OBJECTION_KEY, 15),
    ]
}

fn default_objection_penalty() -> u32 {
    5
}

fn default_qualified_threshold() -> u32 {
    60
}

/// Static qualification rules shared by every call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualificationPolicy {
    pub required_fields: RequiredFields,
    /// Ordered; the breakdown follows this order
    #[serde(default = "default_score_weights")]
    pub score_weights: Vec<ScoreWeight>,
    /// Points removed from the no-objection condition per objection
    #[serde(default = "default_objection_penalty")]
    pub objection_penalty: u32,
    /// Minimum score for a CLOSE call to count as qualified
    #[serde(default = "default_qualified_threshold")]
    pub qualified_threshold: u32,
}

impl Default for QualificationPolicy {
    fn default() -> Self {
        Self {
            required_fields: RequiredFields::default(),
            score_weights: default_score_weights(),
            objection_penalty: default_objection_penalty(),
            qualified_threshold: default_qualified_threshold(),
        }
    }
}

impl QualificationPolicy {
    pub fn required_for(&self, state: CallState) -> &[String] {
        self.required_fields.for_state(state)
    }

    /// Whether `field` may be stored in a session
    pub fn is_known_field(&self, field: &str) -> bool {
        field != NO_OBJECTION_KEY
            && (self.required_fields.all().any(|f| f == field)
                || self.score_weights.iter().any(|w| w.name == field)
                || EXTRA_FIELDS.contains(&field))
    }

    /// Sum of all weights, before the 100 cap
    pub fn max_points(&self) -> u32 {
        self.score_weights.iter().map(|w| w.points).sum()
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.qualified_threshold > 100 {
            return Err(crate::Error::InvalidPolicy(format!(
                "qualified_threshold {} exceeds 100",
                self.qualified_threshold
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for weight in &self.score_weights {
            if !seen.insert(weight.name.as_str()) {
                return Err(crate::Error::InvalidPolicy(format!(
                    "duplicate score weight '{}'",
                    weight.name
                )));
            }
        }
        Ok(())
    }
}
