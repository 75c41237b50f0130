//! Automatic quality review of finished calls
//!
//! A chat model grades adherence, clarity and outcome quality; field
//! completion is measured directly. Review failures never surface as errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use voice_qualifier_core::{CallResult, TurnRole};
use voice_qualifier_llm::{LlmBackend, Message};

/// Fields measured by `fields_completion`
pub const QUALIFICATION_FIELDS: [&str; 5] = [
    "confirmed_interest",
    "objetivo",
    "prazo",
    "disponibilidade",
    "forma_pagamento",
];

const NEUTRAL_GRADE: f64 = 0.5;

const QA_SYSTEM_PROMPT: &str = r#"Você é um avaliador de qualidade de ligações de vendas.
Analise a transcrição e retorne APENAS JSON (sem markdown):
{
  "script_adherence": 0.0 a 1.0 (a IA seguiu o roteiro de qualificação?),
  "clarity_score": 0.0 a 1.0 (falas claras, naturais, sem erros?),
  "outcome_quality": 0.0 a 1.0 (resultado adequado dado o contexto?),
  "notes": "2-3 frases sobre pontos fortes e fracos"
}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaScores {
    pub script_adherence: f64,
    pub clarity_score: f64,
    pub outcome_quality: f64,
    pub fields_completion: f64,
    pub avg_latency_ms: u64,
    pub overall_score: f64,
    pub notes: String,
}

/// Share of [`QUALIFICATION_FIELDS`] present in the result
pub fn fields_completion(result: &CallResult) -> f64 {
    let collected = QUALIFICATION_FIELDS
        .iter()
        .filter(|f| result.collected_fields.contains_key(**f))
        .count();
    collected as f64 / QUALIFICATION_FIELDS.len() as f64
}

/// Weighted overall grade
pub fn overall_score(adherence: f64, clarity: f64, completion: f64, outcome: f64) -> f64 {
    adherence * 0.3 + clarity * 0.2 + completion * 0.3 + outcome * 0.2
}

pub struct QaEvaluator {
    backend: Arc<dyn LlmBackend>,
}

impl QaEvaluator {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }

    fn transcript(result: &CallResult) -> String {
        result
            .transcript
            .iter()
            .map(|t| {
                let who = match t.role {
                    TurnRole::User => "Lead",
                    TurnRole::Assistant => "IA",
                };
                format!("{} [{}]: {}", who, t.fsm_state, t.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn user_content(result: &CallResult) -> String {
        format!(
            "TRANSCRIÇÃO:\n{}\n\nDADOS DA CHAMADA:\n\
             - Outcome: {}\n\
             - Score: {}/100\n\
             - Campos coletados: {}\n\
             - Objeções: {}\n\
             - Duração: {}s\n\
             - Turnos: {}",
            Self::transcript(result),
            result.outcome,
            result.score,
            serde_json::to_string(&result.collected_fields).unwrap_or_default(),
            result.objections.join(", "),
            result.duration_seconds,
            result.transcript.len(),
        )
    }

    /// Grade a call; `None` for empty transcripts or any review failure
    pub async fn evaluate(&self, result: &CallResult) -> Option<QaScores> {
        if result.transcript.is_empty() {
            return None;
        }

        let messages = vec![
            Message::system(QA_SYSTEM_PROMPT),
            Message::user(Self::user_content(result)),
        ];

        let generated = match self.backend.generate_json(&messages).await {
            Ok(generated) => generated,
            Err(e) => {
                tracing::error!(call_id = %result.call_id, error = %e, "QA review failed");
                return None;
            }
        };

        let grades: Value = match serde_json::from_str(generated.text.trim()) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) | Err(_) => {
                tracing::error!(call_id = %result.call_id, "QA review returned invalid JSON");
                return None;
            }
        };

        let grade = |key: &str| {
            grades
                .get(key)
                .and_then(Value::as_f64)
                .unwrap_or(NEUTRAL_GRADE)
        };
        let script_adherence = grade("script_adherence");
        let clarity_score = grade("clarity_score");
        let outcome_quality = grade("outcome_quality");
        let completion = fields_completion(result);
        let overall = overall_score(script_adherence, clarity_score, completion, outcome_quality);

        tracing::info!(call_id = %result.call_id, overall = overall, "QA review complete");

        Some(QaScores {
            script_adherence,
            clarity_score,
            outcome_quality,
            fields_completion: completion,
            avg_latency_ms: result.avg_latency_ms,
            overall_score: overall,
            notes: grades
                .get("notes")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}
