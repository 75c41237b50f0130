//! Integration wiring from settings
//!
//! Each collaborator falls back to its stub when the settings carry no
//! endpoint or credentials, so a development server runs without any
//! external account.

use std::sync::Arc;

use voice_qualifier_config::Settings;

use crate::crm::{Crm, HttpCrm, StubCrm};
use crate::dialer::{Dialer, StubDialer, TwilioDialer};
use crate::knowledge::{HttpKnowledgeRetriever, KnowledgeRetriever, NoKnowledge};
use crate::messaging::{HttpMessenger, LogMessenger, Messenger};
use crate::scheduling::{HttpScheduler, Scheduler, StubScheduler};
use crate::IntegrationError;

/// External collaborators used by the call lifecycle
#[derive(Clone)]
pub struct Integrations {
    pub dialer: Arc<dyn Dialer>,
    pub scheduler: Arc<dyn Scheduler>,
    pub messenger: Arc<dyn Messenger>,
    pub knowledge: Arc<dyn KnowledgeRetriever>,
    pub crm: Arc<dyn Crm>,
}

impl Integrations {
    /// Stubs for development and testing
    pub fn with_stubs() -> Self {
        Self {
            dialer: Arc::new(StubDialer),
            scheduler: Arc::new(StubScheduler::default()),
            messenger: Arc::new(LogMessenger),
            knowledge: Arc::new(NoKnowledge),
            crm: Arc::new(StubCrm),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, IntegrationError> {
        let mut integrations = Self::with_stubs();

        if settings.telephony.has_credentials() {
            integrations.dialer = Arc::new(TwilioDialer::new(&settings.telephony)?);
        } else {
            tracing::warn!("Telephony credentials missing, outbound calls are simulated");
        }

        if let Some(endpoint) = &settings.messaging.endpoint {
            integrations.messenger = Arc::new(HttpMessenger::new(
                endpoint,
                settings.messaging.api_key.clone(),
            )?);
        }

        let scheduling = &settings.scheduling;
        match &scheduling.endpoint {
            Some(endpoint) => {
                integrations.scheduler = Arc::new(HttpScheduler::new(
                    endpoint,
                    scheduling.api_key.clone(),
                    &scheduling.calendar,
                    &scheduling.closer,
                )?);
            }
            None => {
                integrations.scheduler = Arc::new(StubScheduler::new(&scheduling.closer));
                tracing::warn!("Calendar not configured, meetings are kept local");
            }
        }

        if let Some(endpoint) = &settings.knowledge.endpoint {
            integrations.knowledge = Arc::new(HttpKnowledgeRetriever::new(endpoint)?);
        }

        if let Some(endpoint) = &settings.crm.endpoint {
            integrations.crm = Arc::new(HttpCrm::new(endpoint, settings.crm.api_key.clone())?);
        }

        Ok(integrations)
    }

    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn Messenger>) -> Self {
        self.messenger = messenger;
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeRetriever>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_crm(mut self, crm: Arc<dyn Crm>) -> Self {
        self.crm = crm;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_stubs() {
        let mut settings = Settings::default();
        settings.telephony.account_sid = None;
        settings.telephony.auth_token = None;
        assert!(Integrations::from_settings(&settings).is_ok());
    }

    #[test]
    fn test_http_collaborators_from_endpoints() {
        let mut settings = Settings::default();
        settings.telephony.account_sid = Some("AC1".into());
        settings.telephony.auth_token = Some("token".into());
        settings.messaging.endpoint = Some("http://localhost:9000/messages".into());
        settings.crm.endpoint = Some("http://localhost:9001".into());
        settings.knowledge.endpoint = Some("http://localhost:9002/search".into());
        settings.scheduling.endpoint = Some("http://localhost:9003".into());
        assert!(Integrations::from_settings(&settings).is_ok());
    }
}
