//! Request/response mode: one chat completion per caller utterance

use std::sync::Arc;

use voice_qualifier_core::{
    CallScript, CallSession, FsmEngine, KnowledgeSnippet, TransitionRecord, TurnRole,
};
use voice_qualifier_llm::LlmBackend;

use crate::instructions::{InstructionBuilder, Persona};
use crate::response::AgentResponse;

/// Produces validated replies; never fails
pub struct StructuredResponder {
    backend: Arc<dyn LlmBackend>,
    persona: Persona,
}

impl StructuredResponder {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            persona: Persona::default(),
        }
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    /// Ask the model for the next reply, falling back to the canned line for
    /// the current state on any failure
    pub async fn respond(
        &self,
        session: &CallSession,
        knowledge: &[KnowledgeSnippet],
        script: Option<&CallScript>,
        utterance: &str,
    ) -> AgentResponse {
        let messages = InstructionBuilder::new(session)
            .with_persona(self.persona.clone())
            .with_knowledge(knowledge)
            .with_script(script)
            .build_messages(utterance);

        match self.backend.generate_json(&messages).await {
            Ok(result) => AgentResponse::parse(&result.text, session.state).unwrap_or_else(|| {
                tracing::warn!(
                    call_id = %session.call_id,
                    state = %session.state,
                    "Unusable agent reply, using fallback"
                );
                AgentResponse::fallback(session.state)
            }),
            Err(e) => {
                tracing::error!(
                    call_id = %session.call_id,
                    state = %session.state,
                    error = %e,
                    "Agent generation failed, using fallback"
                );
                AgentResponse::fallback(session.state)
            }
        }
    }

    /// Fold a reply into the state machine
    ///
    /// Fields, objection and handoff reason are recorded before the action is
    /// resolved. A rejected transition is logged and the state is kept.
    pub fn apply(engine: &mut FsmEngine, response: &AgentResponse) -> Option<TransitionRecord> {
        engine.update_fields(response.fields_update.clone());
        if let Some(objection) = response.objection_detected.as_deref() {
            engine.add_objection(objection);
        }
        if let Some(reason) = response.handoff_reason.as_deref() {
            engine.set_handoff_reason(reason);
        }

        match engine.apply_action(response.action.as_str()) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    call_id = %engine.session().call_id,
                    error = %e,
                    "Suggested action ignored"
                );
                None
            }
        }
    }

    /// One full turn: record the utterance, reply, apply, record the reply
    pub async fn handle_turn(
        &self,
        engine: &mut FsmEngine,
        knowledge: &[KnowledgeSnippet],
        script: Option<&CallScript>,
        utterance: &str,
    ) -> AgentResponse {
        let response = self
            .respond(engine.session(), knowledge, script, utterance)
            .await;
        engine.add_turn(TurnRole::User, utterance);
        Self::apply(engine, &response);
        engine.add_turn(TurnRole::Assistant, &response.say);
        response
    }
}
