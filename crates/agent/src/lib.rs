//! Agent contract for the voice qualifier
//!
//! Features:
//! - Realtime instructions and the request/response system prompt
//! - Tool vocabulary and execution against the state machine
//! - Reply validation with per-state fallbacks
//! - Call summary and automatic QA review

pub mod instructions;
pub mod qa;
pub mod responder;
pub mod response;
pub mod summary;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use instructions::{state_guidance, InstructionBuilder, Persona, HISTORY_WINDOW};
pub use qa::{QaEvaluator, QaScores};
pub use responder::StructuredResponder;
pub use response::AgentResponse;
pub use summary::{
    summarize_or_placeholder, CallSummarizer, DisabledSummarizer, LlmSummarizer,
    SUMMARY_UNAVAILABLE,
};
pub use tools::{tool_definitions, ToolCommand, ToolOutcome};

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Invalid model output: {0}")]
    InvalidOutput(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Core error: {0}")]
    Core(#[from] voice_qualifier_core::Error),
}

impl From<voice_qualifier_llm::LlmError> for AgentError {
    fn from(err: voice_qualifier_llm::LlmError) -> Self {
        AgentError::Llm(err.to_string())
    }
}
