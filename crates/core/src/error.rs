//! Error types for the core crate

use thiserror::Error;

use crate::fsm::FsmError;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown call state: {0}")]
    UnknownState(String),

    #[error("Unknown outcome: {0}")]
    UnknownOutcome(String),

    #[error("State machine error: {0}")]
    Fsm(#[from] FsmError),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using core Error
pub type Result<T> = std::result::Result<T, Error>;
