//! Persistence error types

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Call not found: {0}")]
    NotFound(String),

    #[error("Call {0} already exists")]
    Duplicate(Uuid),

    #[error("Result for call {0} already stored")]
    AlreadyFinalized(Uuid),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}
