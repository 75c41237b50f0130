//! External system integrations
//!
//! Traits for every collaborator the call lifecycle talks to, each with an
//! HTTP implementation and a stub used in development and tests:
//! - Outbound dialer (telephony REST API)
//! - Meeting scheduling
//! - Messaging (confirmation and follow-up texts)
//! - Knowledge retrieval
//! - CRM updates

pub mod crm;
pub mod dialer;
pub mod factory;
pub mod knowledge;
pub mod messaging;
pub mod scheduling;

pub use crm::{funnel_stage, lead_status, Crm, CrmCallReport, HttpCrm, StubCrm};
pub use dialer::{DialRequest, Dialer, StubDialer, TwilioDialer};
pub use factory::Integrations;
pub use knowledge::{
    retrieve_or_empty, HttpKnowledgeRetriever, KnowledgeRetriever, NoKnowledge,
};
pub use messaging::{
    follow_up_text, format_date_pt, schedule_confirmation_text, HttpMessenger, LogMessenger,
    Messenger,
};
pub use scheduling::{
    parse_meeting_date, HttpScheduler, MeetingBooking, MeetingRequest, Scheduler, StubScheduler,
};

use thiserror::Error;

/// Integration errors
#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Timed out")]
    Timeout,

    #[error("Not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for IntegrationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IntegrationError::Timeout
        } else if err.is_connect() {
            IntegrationError::ConnectionFailed(err.to_string())
        } else {
            IntegrationError::Internal(err.to_string())
        }
    }
}

/// Map a non-success HTTP response onto an error
pub(crate) async fn check_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, IntegrationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = format!("HTTP {}: {}", status, body);
    Err(match status.as_u16() {
        401 | 403 => IntegrationError::AuthFailed(detail),
        404 => IntegrationError::NotFound(detail),
        429 => IntegrationError::RateLimited,
        400..=499 => IntegrationError::InvalidRequest(detail),
        _ => IntegrationError::Internal(detail),
    })
}
