//! Structured replies from request/response mode
//!
//! Whatever the model returns is coerced into an [`AgentResponse`] with every
//! key present. When nothing usable comes back the per-state fallback is used.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use voice_qualifier_core::{CallState, SymbolicAction};

/// Spoken text longer than this is cut down
pub const MAX_SAY_WORDS: usize = 60;

/// Words kept when cutting
pub const TRUNCATED_SAY_WORDS: usize = 50;

pub const DEFAULT_SAY: &str = "Desculpe, pode repetir?";

pub const DEFAULT_CONFIDENCE: f32 = 0.5;

pub const FALLBACK_CONFIDENCE: f32 = 0.3;

/// A validated agent reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub say: String,
    pub ask: Option<String>,
    pub action: SymbolicAction,
    pub fields_update: BTreeMap<String, Option<String>>,
    pub confidence: f32,
    pub handoff_reason: Option<String>,
    pub objection_detected: Option<String>,
    pub next_state_suggestion: CallState,
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Cap spoken text at [`MAX_SAY_WORDS`]
fn limit_words(say: &str) -> String {
    let words: Vec<&str> = say.split_whitespace().collect();
    if words.len() > MAX_SAY_WORDS {
        format!("{}...", words[..TRUNCATED_SAY_WORDS].join(" "))
    } else {
        say.to_string()
    }
}

impl AgentResponse {
    /// Parse raw model text; `None` when it is not a JSON object
    pub fn parse(raw: &str, current: CallState) -> Option<Self> {
        let trimmed = raw.trim();
        // Some models wrap JSON in a code fence
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|s| s.strip_suffix("```"))
            .unwrap_or(trimmed);

        match serde_json::from_str::<Value>(body.trim()) {
            Ok(value @ Value::Object(_)) => Some(Self::validate(&value, current)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Agent reply is not valid JSON");
                None
            }
        }
    }

    /// Fill defaults and clamp values of a decoded reply
    pub fn validate(value: &Value, current: CallState) -> Self {
        let say = non_empty_string(value.get("say"))
            .map(|s| limit_words(&s))
            .unwrap_or_else(|| DEFAULT_SAY.to_string());

        let action = value
            .get("action")
            .and_then(Value::as_str)
            .and_then(|a| a.parse::<SymbolicAction>().ok())
            .unwrap_or(SymbolicAction::Continue);

        let confidence = value
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0) as f32)
            .unwrap_or(DEFAULT_CONFIDENCE);

        let fields_update = value
            .get("fields_update")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(k, v)| {
                        let v = match v {
                            Value::Null => None,
                            Value::String(s) => Some(s.clone()),
                            other => Some(other.to_string()),
                        };
                        (k.clone(), v)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let next_state_suggestion = value
            .get("next_state_suggestion")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<CallState>().ok())
            .unwrap_or(current);

        Self {
            say,
            ask: non_empty_string(value.get("ask")),
            action,
            fields_update,
            confidence,
            handoff_reason: non_empty_string(value.get("handoff_reason")),
            objection_detected: non_empty_string(value.get("objection_detected")),
            next_state_suggestion,
        }
    }

    /// Canned reply for `state`, used when the model gives nothing usable
    pub fn fallback(state: CallState) -> Self {
        let (say, action) = match state {
            CallState::Opening => (
                "Oi! Tudo bem? Estou ligando sobre o seu interesse no curso. Tem um minutinho?",
                SymbolicAction::Continue,
            ),
            CallState::Context => (
                "Você ainda tem interesse em saber mais sobre o curso?",
                SymbolicAction::Continue,
            ),
            CallState::Qualify => (
                "Me conta um pouco mais: o que você busca com esse curso?",
                SymbolicAction::Continue,
            ),
            CallState::HandleObjection => (
                "Entendo totalmente. Posso te explicar melhor como funciona?",
                SymbolicAction::Continue,
            ),
            CallState::Schedule => (
                "Qual o melhor dia e horário para a nossa conversa?",
                SymbolicAction::Continue,
            ),
            CallState::WarmTransfer => (
                "Vou te passar para um especialista, só um instante.",
                SymbolicAction::Continue,
            ),
            CallState::FollowUp => (
                "Vou te mandar o material pelo WhatsApp, tudo bem?",
                SymbolicAction::Continue,
            ),
            CallState::Close => (
                "Muito obrigada pelo seu tempo! Tenha um ótimo dia!",
                SymbolicAction::EndCall,
            ),
        };

        Self {
            say: say.to_string(),
            ask: None,
            action,
            fields_update: BTreeMap::new(),
            confidence: FALLBACK_CONFIDENCE,
            handoff_reason: None,
            objection_detected: None,
            next_state_suggestion: state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_fills_defaults() {
        let r = AgentResponse::validate(&json!({}), CallState::Qualify);
        assert_eq!(r.say, DEFAULT_SAY);
        assert_eq!(r.action, SymbolicAction::Continue);
        assert_eq!(r.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(r.next_state_suggestion, CallState::Qualify);
        assert!(r.fields_update.is_empty());
        assert!(r.ask.is_none());
    }

    #[test]
    fn test_validate_sanitizes() {
        let r = AgentResponse::validate(
            &json!({
                "say": "Perfeito!",
                "action": "dance",
                "confidence": 3.2,
                "next_state_suggestion": "NOWHERE",
                "fields_update": {"prazo": "3 meses", "objetivo": null},
                "objection_detected": ""
            }),
            CallState::Context,
        );
        assert_eq!(r.action, SymbolicAction::Continue);
        assert_eq!(r.confidence, 1.0);
        assert_eq!(r.next_state_suggestion, CallState::Context);
        assert_eq!(r.fields_update["prazo"].as_deref(), Some("3 meses"));
        assert_eq!(r.fields_update["objetivo"], None);
        assert!(r.objection_detected.is_none());

        let negative = AgentResponse::validate(&json!({"confidence": -1}), CallState::Context);
        assert_eq!(negative.confidence, 0.0);
    }

    #[test]
    fn test_long_say_is_truncated() {
        let long = vec!["palavra"; 61].join(" ");
        let r = AgentResponse::validate(&json!({ "say": long }), CallState::Opening);
        assert!(r.say.ends_with("..."));
        assert_eq!(r.say.trim_end_matches("...").split_whitespace().count(), 50);

        let exact = vec!["palavra"; 60].join(" ");
        let r = AgentResponse::validate(&json!({ "say": exact.clone() }), CallState::Opening);
        assert_eq!(r.say, exact);
    }

    #[test]
    fn test_parse_handles_fences_and_garbage() {
        let fenced = "```json\n{\"say\": \"Oi\", \"action\": \"advance\"}\n```";
        let r = AgentResponse::parse(fenced, CallState::Opening).unwrap();
        assert_eq!(r.action, SymbolicAction::Advance);

        assert!(AgentResponse::parse("não sei", CallState::Opening).is_none());
        assert!(AgentResponse::parse("[1, 2]", CallState::Opening).is_none());
    }

    #[test]
    fn test_fallback_covers_every_state() {
        for state in CallState::ALL {
            let r = AgentResponse::fallback(state);
            assert!(!r.say.is_empty());
            assert_eq!(r.confidence, FALLBACK_CONFIDENCE);
            assert_eq!(r.next_state_suggestion, state);
        }
        assert_eq!(
            AgentResponse::fallback(CallState::Close).action,
            SymbolicAction::EndCall
        );
    }
}
