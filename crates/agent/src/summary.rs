//! End-of-call summary

use async_trait::async_trait;
use std::sync::Arc;

use voice_qualifier_core::{CallSession, TurnRole};
use voice_qualifier_llm::{LlmBackend, Message};

use crate::AgentError;

pub const SUMMARY_UNAVAILABLE: &str = "Resumo não disponível";

const SUMMARY_SYSTEM_PROMPT: &str = r#"Gere um resumo objetivo da ligação de qualificação. Formato:
📞 RESUMO DA LIGAÇÃO
📅 Data: [data]
👤 Lead: [nome]
🎓 Curso: [curso]
📊 Score: [score]/100
📌 Dados coletados: [listar]
⚠️ Objeções: [listar ou "nenhuma"]
🎯 Resultado: [qualified/not_qualified/scheduled/transferred/follow_up]
📝 Observações: [2-3 frases do que aconteceu]

Seja breve e direto."#;

/// Produces the natural-language call summary
#[async_trait]
pub trait CallSummarizer: Send + Sync {
    async fn summarize(&self, session: &CallSession) -> Result<String, AgentError>;
}

/// Summary from a chat completion
pub struct LlmSummarizer {
    backend: Arc<dyn LlmBackend>,
}

impl LlmSummarizer {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }

    fn user_content(session: &CallSession) -> String {
        let conversation = session
            .history
            .iter()
            .map(|t| {
                let who = match t.role {
                    TurnRole::User => "Lead",
                    TurnRole::Assistant => "IA",
                };
                format!("{}: {}", who, t.text)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let fields = serde_json::to_string(&session.collected_fields).unwrap_or_default();
        let objections = if session.objections.is_empty() {
            "nenhuma".to_string()
        } else {
            session.objections.join(", ")
        };

        format!(
            "Lead: {}\nCurso: {}\nScore: {}/100\nCampos: {}\nObjeções: {}\nEstado final: {}\n\nConversa:\n{}",
            session.lead.name,
            session.lead.course,
            session.calculate_score().total,
            fields,
            objections,
            session.state,
            conversation,
        )
    }
}

#[async_trait]
impl CallSummarizer for LlmSummarizer {
    async fn summarize(&self, session: &CallSession) -> Result<String, AgentError> {
        let messages = vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(Self::user_content(session)),
        ];
        let result = self.backend.generate(&messages).await?;
        Ok(result.text)
    }
}

/// Used when no chat backend is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSummarizer;

#[async_trait]
impl CallSummarizer for DisabledSummarizer {
    async fn summarize(&self, _session: &CallSession) -> Result<String, AgentError> {
        Ok(String::new())
    }
}

/// Summary text that is always usable: failures become a placeholder
pub async fn summarize_or_placeholder(
    summarizer: &dyn CallSummarizer,
    session: &CallSession,
) -> String {
    match summarizer.summarize(session).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => SUMMARY_UNAVAILABLE.to_string(),
        Err(e) => {
            tracing::warn!(call_id = %session.call_id, error = %e, "Summary generation failed");
            format!("Erro ao gerar resumo: {}", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use voice_qualifier_core::LeadInfo;

    fn session() -> CallSession {
        let mut s = CallSession::new(
            "CA5",
            LeadInfo::new("Marta", "+5521977776666").with_course("Psicologia"),
        );
        s.add_turn(TurnRole::Assistant, "Oi Marta!");
        s.add_turn(TurnRole::User, "Oi, tudo bem?");
        s.add_objection("preço");
        s
    }

    #[tokio::test]
    async fn test_summary_prompt_content() {
        let backend = Arc::new(ScriptedBackend::replying("📞 RESUMO"));
        let summarizer = LlmSummarizer::new(backend.clone());
        let text = summarize_or_placeholder(&summarizer, &session()).await;
        assert_eq!(text, "📞 RESUMO");

        let sent = backend.last_messages();
        assert!(sent[0].content.contains("RESUMO DA LIGAÇÃO"));
        let user = &sent[1].content;
        assert!(user.contains("Lead: Marta"));
        assert!(user.contains("Curso: Psicologia"));
        assert!(user.contains("Objeções: preço"));
        assert!(user.contains("IA: Oi Marta!\nLead: Oi, tudo bem?"));
    }

    #[tokio::test]
    async fn test_placeholders() {
        let empty = LlmSummarizer::new(Arc::new(ScriptedBackend::replying("  ")));
        assert_eq!(
            summarize_or_placeholder(&empty, &session()).await,
            SUMMARY_UNAVAILABLE
        );

        let failing = LlmSummarizer::new(Arc::new(ScriptedBackend::failing()));
        let text = summarize_or_placeholder(&failing, &session()).await;
        assert!(text.starts_with("Erro ao gerar resumo: "));

        assert_eq!(
            summarize_or_placeholder(&DisabledSummarizer, &session()).await,
            SUMMARY_UNAVAILABLE
        );
    }
}
