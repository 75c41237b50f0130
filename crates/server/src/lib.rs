//! Voice Qualifier Server
//!
//! Lead intake, telephony webhooks, the media stream endpoint and call
//! management on one axum router.

pub mod http;
pub mod lifecycle;
pub mod metrics;
pub mod phone;
pub mod rehearsal;
pub mod state;
pub mod stream;
pub mod twiml;

pub use http::create_router;
pub use lifecycle::{NewLead, StatusCallback};
pub use metrics::init_metrics;
pub use phone::normalize_phone;
pub use state::AppState;

use thiserror::Error;

use voice_qualifier_integrations::IntegrationError;
use voice_qualifier_persistence::PersistenceError;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The call is not in a state that allows the action
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Integration error: {0}")]
    Integration(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PersistenceError> for ServerError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound(what) => ServerError::NotFound(what),
            other => ServerError::Persistence(other.to_string()),
        }
    }
}

impl From<IntegrationError> for ServerError {
    fn from(err: IntegrationError) -> Self {
        match err {
            IntegrationError::InvalidRequest(msg) => ServerError::InvalidRequest(msg),
            other => ServerError::Integration(other.to_string()),
        }
    }
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Conflict(_) => axum::http::StatusCode::CONFLICT,
            ServerError::Integration(_) => axum::http::StatusCode::BAD_GATEWAY,
            ServerError::Persistence(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
