//! Instruction building for the speech and chat models
//!
//! The same session view feeds two renderings: realtime instructions paired
//! with the tool vocabulary, and a structured-output prompt for request/response
//! mode that expects a JSON reply.

use voice_qualifier_core::{CallScript, CallSession, CallState, KnowledgeSnippet, TurnRole};
use voice_qualifier_llm::Message;

/// Turns of history replayed in request/response mode
pub const HISTORY_WINDOW: usize = 10;

/// Identity the agent speaks as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub name: String,
    pub organization: String,
    /// One-line description of what the call is for
    pub objective: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Nat".to_string(),
            organization: "CENAT".to_string(),
            objective: "qualificar o candidato da pós-graduação e agendar uma conversa com a consultora"
                .to_string(),
        }
    }
}

impl Persona {
    pub fn new(name: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            organization: organization.into(),
            ..Default::default()
        }
    }
}

/// Per-state behavioural guidance
///
/// QUALIFY lists the fields still missing; HANDLE_OBJECTION lists the
/// objections already raised.
pub fn state_guidance(session: &CallSession) -> String {
    match session.state {
        CallState::Opening => "Apresente-se, diga o motivo da ligação e peça permissão para continuar. \
             Se o lead estiver ocupado, pergunte o melhor horário. No máximo duas tentativas."
            .to_string(),
        CallState::Context => "Confirme o interesse do lead no curso. \
             Quando ele confirmar, registre confirmed_interest e avance para QUALIFY."
            .to_string(),
        CallState::Qualify => {
            let missing = session.get_missing_fields();
            if missing.is_empty() {
                "Todos os dados foram coletados. Ofereça o agendamento com a consultora.".to_string()
            } else {
                format!(
                    "Colete de forma natural, UMA pergunta por vez, os campos que faltam: {}.",
                    missing.join(", ")
                )
            }
        }
        CallState::HandleObjection => {
            let raised = if session.objections.is_empty() {
                "nenhuma registrada".to_string()
            } else {
                session.objections.join(", ")
            };
            format!(
                "Objeções do lead: {}. Empatia primeiro, depois argumente. \
                 Resolvida a objeção, volte para QUALIFY. Depois de duas tentativas sem sucesso, \
                 ofereça FOLLOW_UP.",
                raised
            )
        }
        CallState::Schedule => "Ofereça horários, confirme dia e hora com o lead e avise que a \
             confirmação chega pelo WhatsApp."
            .to_string(),
        CallState::WarmTransfer => "Avise que vai transferir para um especialista e registre o \
             motivo em handoff_reason."
            .to_string(),
        CallState::FollowUp => "Combine o envio do material pelo WhatsApp e se despeça com cordialidade."
            .to_string(),
        CallState::Close => "Agradeça o tempo do lead, despeça-se e encerre a ligação com end_call."
            .to_string(),
    }
}

/// Assembles instructions for one call
#[derive(Debug, Clone)]
pub struct InstructionBuilder<'a> {
    persona: Persona,
    session: &'a CallSession,
    knowledge: &'a [KnowledgeSnippet],
    script: Option<&'a CallScript>,
}

impl<'a> InstructionBuilder<'a> {
    pub fn new(session: &'a CallSession) -> Self {
        Self {
            persona: Persona::default(),
            session,
            knowledge: &[],
            script: None,
        }
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_knowledge(mut self, knowledge: &'a [KnowledgeSnippet]) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_script(mut self, script: Option<&'a CallScript>) -> Self {
        self.script = script;
        self
    }

    fn or_default<'s>(value: &'s str, default: &'s str) -> &'s str {
        if value.trim().is_empty() {
            default
        } else {
            value
        }
    }

    fn lead_info(&self) -> String {
        let lead = &self.session.lead;
        format!(
            "## Lead Info\n\
             - Nome: {}\n\
             - Telefone: {}\n\
             - Curso de interesse: {}\n\
             - Origem: {}\n\
             - Campanha: {}\n",
            lead.name,
            lead.phone,
            Self::or_default(&lead.course, "não especificado"),
            Self::or_default(&lead.source, "site"),
            Self::or_default(&lead.campaign, "orgânico"),
        )
    }

    fn rules(&self) -> String {
        format!(
            r#"# Rules

- Frases curtas e naturais. É uma LIGAÇÃO, não um texto.
- UMA pergunta por vez. Só pare quando a última frase for uma pergunta direta.
- Português brasileiro natural, tom caloroso e confiante.
- NUNCA invente preços, datas ou informações que não estejam no contexto. Se não souber: "vou verificar pra você".
- NUNCA diga que é IA ou robô. Se perguntarem: "Sou da equipe de atendimento da {org}!"
- Se o lead estiver ocupado, pergunte o melhor horário para retornar.
- Colete informações naturalmente, nunca como um formulário.
- Objeção: EMPATIA primeiro, depois argumente.
- Dados pessoais são confidenciais (LGPD). Nunca repita CPF, endereço ou dados sensíveis.
"#,
            org = self.persona.organization
        )
    }

    fn state_section(&self) -> String {
        format!(
            "# Current State\n\nEstado atual: {}\n{}\n",
            self.session.state,
            state_guidance(self.session)
        )
    }

    /// Script override, knowledge, policies and scripted objection answers
    fn context_sections(&self) -> String {
        let mut out = String::new();

        if let Some(text) = self.script.and_then(|s| s.system_prompt_override.as_deref()) {
            out.push_str(&format!("\n# Script Override\n\n{}\n", text));
        }

        if !self.knowledge.is_empty() {
            out.push_str("\n# Context\n\nBASE DE CONHECIMENTO (use para responder perguntas):\n");
            for snippet in self.knowledge {
                out.push_str(&format!("- {}: {}\n", snippet.title, snippet.content));
            }
        }

        if let Some(script) = self.script {
            if !script.policies.is_empty() {
                out.push_str("\n# Policies\n\nRESPEITE RIGOROSAMENTE:\n");
                for (key, value) in &script.policies {
                    out.push_str(&format!("- {}: {}\n", key, value));
                }
            }
            if !script.objection_responses.is_empty() {
                out.push_str("\n# Objection Responses\n\n");
                for (objection, answer) in &script.objection_responses {
                    out.push_str(&format!("- Se disser '{}': {}\n", objection, answer));
                }
            }
        }

        out
    }

    /// Instructions for the realtime speech model
    pub fn realtime_instructions(&self) -> String {
        let persona = &self.persona;
        format!(
            r#"# Role & Objective

Você é {name}, SDR da {org}, em uma LIGAÇÃO TELEFÔNICA.
Seu objetivo é {objective}.

{lead_info}
# Personality & Tone

- Simpática, objetiva, empática. NUNCA robótica.
- Use contrações naturais: "tá", "pra", "né". Fale "você", nunca "vc".
- Varie as frases. Não repita a mesma frase duas vezes.

# Language

- SEMPRE português brasileiro, durante toda a conversa.

{rules}
# Adaptive Listening

- Reaja ao que o lead acabou de dizer antes de avançar, usando as palavras dele.
- Adapte o tom ao do lead.

# Turn Pattern

1. Reação curta ("Certo", "Bacana", "Faz sentido")
2. Espelho do que o lead disse
3. Pergunta ou próximo passo

{state}
# Unclear Audio

- Se não ouvir direito: "Desculpa, acho que cortou. Pode repetir?"

# Tools

- Antes de qualquer tool, diga uma frase curta e natural. Depois chame a tool.
- update_lead_fields: sempre que extrair informação (formação, atuação, objetivo, prazo, pagamento).
- change_state: para avançar no fluxo.
- register_objection: ao detectar uma objeção.
- schedule_meeting: quando o lead aceitar um horário.
- end_call: APENAS depois da despedida completa.

# Safety & Escalation

- Se pedir para falar com um humano: "Claro! Vou te transferir agora mesmo." e use change_state para WARM_TRANSFER.
- Se disser "NÃO QUERO" de forma firme, respeite e encerre com educação.
{context}"#,
            name = persona.name,
            org = persona.organization,
            objective = persona.objective,
            lead_info = self.lead_info(),
            rules = self.rules(),
            state = self.state_section(),
            context = self.context_sections(),
        )
    }

    /// Lead and state facts as JSON, for the structured prompt
    fn state_facts(&self) -> (serde_json::Value, serde_json::Value) {
        let session = self.session;
        let lead = serde_json::json!({
            "nome": session.lead.name,
            "telefone": session.lead.phone,
            "curso_interesse": session.lead.course,
            "origem": session.lead.source,
            "campanha": session.lead.campaign,
        });
        let state = serde_json::json!({
            "estado_atual": session.state.as_str(),
            "estado_anterior": session.previous_state.map(|s| s.as_str()),
            "campos_coletados": session.collected_fields,
            "campos_faltantes": session.get_missing_fields(),
            "objecoes_registradas": session.objections,
            "turno_numero": session.turn_count,
            "score_atual": session.calculate_score().total,
        });
        (lead, state)
    }

    /// System prompt for request/response mode, ending in the JSON contract
    pub fn structured_system_prompt(&self) -> String {
        let (lead, state) = self.state_facts();
        let persona = &self.persona;
        let actions = voice_qualifier_core::SymbolicAction::ALL
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join("|");

        format!(
            r#"Você é {name}, SDR da {org}, conversando por telefone. Seu objetivo é {objective}.

{rules}
## Lead
{lead}

## Estado
{state}

{guidance}
{context}
## Formato de resposta
Responda SOMENTE com um JSON válido, sem texto fora dele:
{{
  "say": "texto falado ao lead (máximo 2 frases curtas)",
  "ask": "pergunta seguinte ou null",
  "action": "{actions}",
  "fields_update": {{"campo": "valor"}},
  "confidence": 0.0,
  "handoff_reason": null,
  "objection_detected": null,
  "next_state_suggestion": "{current}"
}}"#,
            name = persona.name,
            org = persona.organization,
            objective = persona.objective,
            rules = self.rules(),
            lead = lead,
            state = state,
            guidance = state_guidance(self.session),
            context = self.context_sections(),
            actions = actions,
            current = self.session.state,
        )
    }

    /// Full message list: system prompt, the last turns, then the new utterance
    pub fn build_messages(&self, user_utterance: &str) -> Vec<Message> {
        let mut messages = vec![Message::system(self.structured_system_prompt())];
        for turn in self.session.recent_turns(HISTORY_WINDOW) {
            messages.push(match turn.role {
                TurnRole::User => Message::user(turn.text.clone()),
                TurnRole::Assistant => Message::assistant(turn.text.clone()),
            });
        }
        messages.push(Message::user(user_utterance));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_qualifier_core::{FsmEngine, LeadInfo};
    use voice_qualifier_llm::Role;

    fn session() -> CallSession {
        CallSession::new(
            "CA1",
            LeadInfo::new("Ana Souza", "+5511999990000").with_course("Saúde Mental"),
        )
    }

    #[test]
    fn test_realtime_lead_defaults() {
        let s = session();
        let text = InstructionBuilder::new(&s).realtime_instructions();
        assert!(text.contains("Você é Nat, SDR da CENAT"));
        assert!(text.contains("- Curso de interesse: Saúde Mental"));
        assert!(text.contains("- Origem: site"));
        assert!(text.contains("- Campanha: orgânico"));
        assert!(text.contains("NUNCA diga que é IA"));
        assert!(text.contains("end_call"));
        assert!(!text.contains("# Context"));
    }

    #[test]
    fn test_context_sections() {
        let s = session();
        let knowledge = vec![KnowledgeSnippet::new("Duração", "18 meses")];
        let mut script = CallScript {
            name: "padrão".into(),
            system_prompt_override: Some("Fale sobre o voucher.".into()),
            is_active: true,
            ..Default::default()
        };
        script
            .policies
            .insert("pode_dar_desconto".into(), "false".into());
        script
            .objection_responses
            .insert("caro".into(), "Temos condições especiais.".into());

        let text = InstructionBuilder::new(&s)
            .with_knowledge(&knowledge)
            .with_script(Some(&script))
            .realtime_instructions();
        assert!(text.contains("# Script Override\n\nFale sobre o voucher."));
        assert!(text.contains("- Duração: 18 meses"));
        assert!(text.contains("- pode_dar_desconto: false"));
        assert!(text.contains("- Se disser 'caro': Temos condições especiais."));
    }

    #[test]
    fn test_qualify_guidance_lists_missing_fields() {
        let mut engine = FsmEngine::new(session());
        engine.transition(CallState::Context, None).unwrap();
        engine.transition(CallState::Qualify, None).unwrap();
        engine.update_fields([("objetivo", Some("carreira"))]);

        let guidance = state_guidance(engine.session());
        assert!(guidance.contains("prazo, disponibilidade, forma_pagamento"));
        assert!(!guidance.contains("objetivo"));
    }

    #[test]
    fn test_objection_guidance_lists_objections() {
        let mut engine = FsmEngine::new(session());
        engine.transition(CallState::Context, None).unwrap();
        engine.transition(CallState::Qualify, None).unwrap();
        engine.transition(CallState::HandleObjection, None).unwrap();
        engine.add_objection("preço alto");
        assert!(state_guidance(engine.session()).contains("preço alto"));
    }

    #[test]
    fn test_every_state_has_guidance() {
        let mut s = session();
        for state in CallState::ALL {
            s.state = state;
            assert!(!state_guidance(&s).is_empty());
        }
    }

    #[test]
    fn test_structured_prompt_contract() {
        let s = session();
        let prompt = InstructionBuilder::new(&s)
            .with_persona(Persona::new("Bia", "Instituto X"))
            .structured_system_prompt();
        assert!(prompt.contains("Você é Bia, SDR da Instituto X"));
        for key in [
            "\"say\"",
            "\"ask\"",
            "\"action\"",
            "\"fields_update\"",
            "\"confidence\"",
            "\"handoff_reason\"",
            "\"objection_detected\"",
            "\"next_state_suggestion\"",
        ] {
            assert!(prompt.contains(key), "missing {}", key);
        }
        assert!(prompt.contains("\"estado_atual\":\"OPENING\""));
    }

    #[test]
    fn test_build_messages_window() {
        let mut s = session();
        for i in 0..8 {
            s.add_turn(TurnRole::User, &format!("pergunta {}", i));
            s.add_turn(TurnRole::Assistant, &format!("resposta {}", i));
        }
        let messages = InstructionBuilder::new(&s).build_messages("e o preço?");
        assert_eq!(messages.len(), 1 + HISTORY_WINDOW + 1);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "pergunta 3");
        assert_eq!(messages.last().unwrap().content, "e o preço?");
    }
}
