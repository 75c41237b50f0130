//! Core types for the voice qualification pipeline
//!
//! - Call states and transcript turns
//! - Qualification policy (required fields, score weights)
//! - Call session and the state machine engine driving it
//! - Outcome classification and the terminal call result
//! - Scripts and knowledge snippets consumed by the agent

pub mod conversation;
pub mod error;
pub mod fsm;
pub mod outcome;
pub mod policy;
pub mod script;
pub mod session;

pub use conversation::{CallState, Turn, TurnRole};
pub use error::{Error, Result};
pub use fsm::{
    FsmEngine, FsmError, SessionSummary, SymbolicAction, TransitionRecord, QUALIFY_INCOMPLETE_TAG,
};
pub use outcome::{CallOutcome, CallResult, HandoffType};
pub use policy::{QualificationPolicy, RequiredFields, ScoreWeight, NO_OBJECTION_KEY};
pub use script::{CallScript, KnowledgeSnippet};
pub use session::{CallSession, LeadInfo, LeadScore};
