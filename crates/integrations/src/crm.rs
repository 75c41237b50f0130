//! CRM updates after a call

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

use voice_qualifier_core::CallOutcome;

use crate::{check_response, IntegrationError};

/// Lead status the CRM shows for each outcome
pub fn lead_status(outcome: CallOutcome) -> &'static str {
    match outcome {
        CallOutcome::Qualified => "qualificado",
        CallOutcome::Scheduled => "agendado",
        CallOutcome::Transferred => "em_atendimento",
        CallOutcome::FollowUp => "follow_up",
        CallOutcome::NotQualified => "nao_qualificado",
        CallOutcome::NoAnswer => "nao_atendeu",
        CallOutcome::Busy => "ocupado",
        CallOutcome::Incomplete | CallOutcome::Error => "em_atendimento_ia",
    }
}

/// Funnel stage a lead moves to; `None` leaves it in place
pub fn funnel_stage(outcome: CallOutcome) -> Option<&'static str> {
    match outcome {
        CallOutcome::Qualified => Some("Qualificado pela IA"),
        CallOutcome::Scheduled => Some("Reunião Agendada"),
        CallOutcome::Transferred => Some("Em Atendimento"),
        CallOutcome::NotQualified => Some("Não Qualificado"),
        _ => None,
    }
}

/// What the CRM learns about a finished call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmCallReport {
    pub lead_id: Option<String>,
    pub lead_name: String,
    pub phone: String,
    pub course: String,
    pub agent_name: String,
    pub outcome: CallOutcome,
    pub score: u32,
    pub duration_seconds: u64,
    pub collected_fields: BTreeMap<String, String>,
    pub objections: Vec<String>,
    pub summary: String,
    pub ended_at: DateTime<Utc>,
}

fn or_na(value: &str) -> &str {
    if value.is_empty() {
        "N/A"
    } else {
        value
    }
}

impl CrmCallReport {
    pub fn status(&self) -> &'static str {
        lead_status(self.outcome)
    }

    /// One-line note prepended to the lead's notes
    pub fn note(&self) -> String {
        let mut note = format!(
            "[IA Voice - {}] Score: {}/100 | Resultado: {}",
            self.ended_at.format("%d/%m %H:%M"),
            self.score,
            self.outcome
        );
        if !self.collected_fields.is_empty() {
            note.push_str(&format!(" | Dados: {}", self.fields_text()));
        }
        if !self.objections.is_empty() {
            note.push_str(&format!(" | Objeções: {}", self.objections.join(", ")));
        }
        note
    }

    fn fields_text(&self) -> String {
        self.collected_fields
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Timeline entry posted to the lead
    pub fn timeline_text(&self) -> String {
        let fields = if self.collected_fields.is_empty() {
            "Nenhum".to_string()
        } else {
            self.fields_text()
        };
        let objections = if self.objections.is_empty() {
            "Nenhuma".to_string()
        } else {
            self.objections.join(", ")
        };
        let summary = if self.summary.is_empty() {
            "Sem resumo"
        } else {
            &self.summary
        };
        format!(
            "📞 LIGAÇÃO IA ({})\n📅 {}\n👤 Lead: {}\n🎓 Curso: {}\n📊 Score: {}/100\n⏱️ Duração: {}s\n🎯 Resultado: {}\n📌 Dados: {}\n⚠️ Objeções: {}\n📝 {}",
            self.agent_name,
            self.ended_at.format("%d/%m/%Y %H:%M"),
            or_na(&self.lead_name),
            or_na(&self.course),
            self.score,
            self.duration_seconds,
            self.outcome,
            fields,
            objections,
            summary
        )
    }
}

#[async_trait]
pub trait Crm: Send + Sync {
    /// Status, notes and timeline entry for the lead
    async fn record_call(&self, report: &CrmCallReport) -> Result<(), IntegrationError>;

    async fn move_in_funnel(&self, lead_id: &str, stage: &str) -> Result<(), IntegrationError>;
}

/// JSON CRM API: `POST /timeline` and `POST /leads/stage`
pub struct HttpCrm {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpCrm {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, IntegrationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| IntegrationError::Internal(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), IntegrationError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        check_response(request.send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl Crm for HttpCrm {
    async fn record_call(&self, report: &CrmCallReport) -> Result<(), IntegrationError> {
        self.post(
            "/timeline",
            json!({
                "leadId": report.lead_id,
                "phone": report.phone,
                "status": report.status(),
                "note": report.note(),
                "text": report.timeline_text(),
            }),
        )
        .await?;
        tracing::info!(phone = %report.phone, status = report.status(), "CRM updated");
        Ok(())
    }

    async fn move_in_funnel(&self, lead_id: &str, stage: &str) -> Result<(), IntegrationError> {
        self.post("/leads/stage", json!({ "leadId": lead_id, "stage": stage }))
            .await?;
        tracing::info!(lead_id = %lead_id, stage = %stage, "Lead moved in funnel");
        Ok(())
    }
}

/// CRM that only logs
#[derive(Debug, Default)]
pub struct StubCrm;

#[async_trait]
impl Crm for StubCrm {
    async fn record_call(&self, report: &CrmCallReport) -> Result<(), IntegrationError> {
        tracing::info!(
            phone = %report.phone,
            status = report.status(),
            note = %report.note(),
            "Stub CRM: call recorded"
        );
        Ok(())
    }

    async fn move_in_funnel(&self, lead_id: &str, stage: &str) -> Result<(), IntegrationError> {
        tracing::info!(lead_id = %lead_id, stage = %stage, "Stub CRM: lead moved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report() -> CrmCallReport {
        CrmCallReport {
            lead_id: Some("42".into()),
            lead_name: "Ana Lima".into(),
            phone: "+5511999990000".into(),
            course: "MBA".into(),
            agent_name: "Nat".into(),
            outcome: CallOutcome::Scheduled,
            score: 75,
            duration_seconds: 180,
            collected_fields: BTreeMap::from([
                ("confirmed_interest".to_string(), "sim".to_string()),
                ("formacao".to_string(), "Administração".to_string()),
            ]),
            objections: vec!["preço".into()],
            summary: "Lead engajada".into(),
            ended_at: Utc.with_ymd_and_hms(2026, 2, 20, 14, 5, 0).unwrap(),
        }
    }

    #[test]
    fn test_status_map_covers_outcomes() {
        assert_eq!(lead_status(CallOutcome::Scheduled), "agendado");
        assert_eq!(lead_status(CallOutcome::NoAnswer), "nao_atendeu");
        assert_eq!(lead_status(CallOutcome::Busy), "ocupado");
        for outcome in CallOutcome::ALL {
            assert!(!lead_status(outcome).is_empty());
        }
    }

    #[test]
    fn test_funnel_stage() {
        assert_eq!(funnel_stage(CallOutcome::Qualified), Some("Qualificado pela IA"));
        assert_eq!(funnel_stage(CallOutcome::FollowUp), None);
        assert_eq!(funnel_stage(CallOutcome::Busy), None);
    }

    #[test]
    fn test_note() {
        let note = report().note();
        assert_eq!(
            note,
            "[IA Voice - 20/02 14:05] Score: 75/100 | Resultado: scheduled | Dados: confirmed_interest: sim, formacao: Administração | Objeções: preço"
        );
    }

    #[test]
    fn test_timeline_text_defaults() {
        let mut r = report();
        r.collected_fields.clear();
        r.objections.clear();
        r.summary.clear();
        r.course.clear();
        let text = r.timeline_text();
        assert!(text.starts_with("📞 LIGAÇÃO IA (Nat)\n📅 20/02/2026 14:05"));
        assert!(text.contains("🎓 Curso: N/A"));
        assert!(text.contains("📌 Dados: Nenhum"));
        assert!(text.contains("⚠️ Objeções: Nenhuma"));
        assert!(text.ends_with("📝 Sem resumo"));
    }

    #[tokio::test]
    async fn test_stub_crm() {
        assert!(StubCrm.record_call(&report()).await.is_ok());
        assert!(StubCrm.move_in_funnel("42", "Reunião Agendada").await.is_ok());
    }
}
