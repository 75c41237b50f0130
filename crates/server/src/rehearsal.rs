//! Script rehearsals through the request/response agent
//!
//! A rehearsal runs the same session, state machine, scoring and reply
//! validation as a phone call, with one chat completion per typed message
//! instead of the realtime model. Operators use it to try scripts and
//! knowledge without dialing anyone.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use voice_qualifier_agent::{summarize_or_placeholder, AgentResponse, StructuredResponder};
use voice_qualifier_core::{
    CallResult, CallScript, CallSession, FsmEngine, KnowledgeSnippet, SessionSummary,
};
use voice_qualifier_integrations::retrieve_or_empty;

use crate::lifecycle::{lead_info, NewLead};
use crate::state::AppState;
use crate::ServerError;

pub const MAX_REHEARSALS: usize = 100;

/// Rehearsals idle longer than this are dropped when room is needed
pub const REHEARSAL_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// One rehearsal conversation
pub struct Rehearsal {
    id: String,
    // Held across the model call so turns of one rehearsal never interleave
    engine: tokio::sync::Mutex<FsmEngine>,
    knowledge: Vec<KnowledgeSnippet>,
    script: Option<CallScript>,
    last_activity: Mutex<Instant>,
}

impl Rehearsal {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.lock().elapsed() > timeout
    }
}

/// Open rehearsals, keyed by id
#[derive(Clone)]
pub struct Rehearsals {
    sessions: Arc<RwLock<HashMap<String, Arc<Rehearsal>>>>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl Default for Rehearsals {
    fn default() -> Self {
        Self::new(MAX_REHEARSALS)
    }
}

impl Rehearsals {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
            idle_timeout: REHEARSAL_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn insert(&self, session: Arc<Rehearsal>) -> Result<(), ServerError> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            let timeout = self.idle_timeout;
            sessions.retain(|_, s| !s.is_idle(timeout));
            if sessions.len() >= self.max_sessions {
                return Err(ServerError::Conflict("max rehearsals reached".into()));
            }
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Rehearsal>> {
        self.sessions.read().get(id).cloned()
    }

    fn remove(&self, id: &str) -> Option<Arc<Rehearsal>> {
        self.sessions.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// Agent reply to one typed message
#[derive(Debug, Clone, Serialize)]
pub struct RehearsalTurn {
    pub rehearsal_id: String,
    pub reply: AgentResponse,
    pub session: SessionSummary,
    /// The conversation reached a state with no way forward
    pub finished: bool,
}

fn agent(state: &AppState) -> Result<&StructuredResponder, ServerError> {
    state
        .responder
        .as_deref()
        .ok_or_else(|| ServerError::Integration("chat model not configured".into()))
}

/// Open a rehearsal for `lead` with the same context a call would get
pub async fn start_rehearsal(
    state: &AppState,
    lead: NewLead,
) -> Result<Arc<Rehearsal>, ServerError> {
    agent(state)?;
    let lead = lead_info(state, lead)?;
    let config = state.get_config();
    let id = Uuid::new_v4().to_string();

    let knowledge = retrieve_or_empty(
        state.integrations.knowledge.as_ref(),
        &lead.course,
        config.knowledge.tenant_id.as_deref(),
        config.knowledge.top_k,
        Duration::from_millis(config.knowledge.timeout_ms),
    )
    .await;
    let script = CallScript::select(&config.scripts, &lead.course).cloned();
    let session = CallSession::with_policy(id.clone(), lead, state.policy.clone());

    let rehearsal = Arc::new(Rehearsal {
        id,
        engine: tokio::sync::Mutex::new(FsmEngine::new(session)),
        knowledge,
        script,
        last_activity: Mutex::new(Instant::now()),
    });
    state.rehearsals.insert(rehearsal.clone())?;
    tracing::info!(
        rehearsal_id = %rehearsal.id,
        snippets = rehearsal.knowledge.len(),
        "Rehearsal started"
    );
    Ok(rehearsal)
}

/// Answer one message. Model failures come back as the fallback line for
/// the current state, never as an error.
pub async fn rehearsal_turn(
    state: &AppState,
    id: &str,
    message: &str,
) -> Result<RehearsalTurn, ServerError> {
    let responder = agent(state)?;
    let message = message.trim();
    if message.is_empty() {
        return Err(ServerError::InvalidRequest("message is required".into()));
    }
    let rehearsal = state
        .rehearsals
        .get(id)
        .ok_or_else(|| ServerError::NotFound(format!("rehearsal {}", id)))?;
    rehearsal.touch();

    let mut engine = rehearsal.engine.lock().await;
    if engine.state().is_terminal() {
        return Err(ServerError::Conflict(format!("rehearsal {} already finished", id)));
    }
    let reply = responder
        .handle_turn(&mut engine, &rehearsal.knowledge, rehearsal.script.as_ref(), message)
        .await;
    let session = engine.session_summary();
    tracing::debug!(
        rehearsal_id = %id,
        state = %session.state,
        action = ?reply.action,
        confidence = reply.confidence,
        "Rehearsal turn"
    );

    Ok(RehearsalTurn {
        rehearsal_id: id.to_string(),
        finished: session.state.is_terminal(),
        reply,
        session,
    })
}

/// Close the rehearsal and project it like a finished call; nothing is persisted
pub async fn end_rehearsal(state: &AppState, id: &str) -> Result<CallResult, ServerError> {
    let rehearsal = state
        .rehearsals
        .remove(id)
        .ok_or_else(|| ServerError::NotFound(format!("rehearsal {}", id)))?;
    let engine = rehearsal.engine.lock().await;
    let summary = summarize_or_placeholder(state.summarizer.as_ref(), engine.session()).await;
    let result = engine.build_result(summary, engine.session().elapsed_secs());
    tracing::info!(
        rehearsal_id = %id,
        outcome = %result.outcome,
        score = result.score,
        turns = result.total_turns,
        "Rehearsal ended"
    );
    Ok(result)
}
