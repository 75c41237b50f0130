//! Outbound dialer
//!
//! Places calls through the telephony provider's REST API. The returned
//! provider call id is the correlation key the media stream carries back.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use voice_qualifier_config::TelephonyConfig;

use crate::{check_response, IntegrationError};

/// Everything the provider needs to place one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialRequest {
    pub to: String,
    pub from: String,
    pub answer_url: String,
    pub status_url: String,
    pub recording_status_url: String,
    pub ring_timeout_secs: u32,
    pub machine_detection_timeout_secs: u32,
    pub record: bool,
}

impl DialRequest {
    /// Build from telephony settings; callback paths are fixed by the HTTP surface
    pub fn from_settings(config: &TelephonyConfig, to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            from: config.from_number.clone(),
            answer_url: config.callback_url("/api/voice-ai/twilio/answer"),
            status_url: config.callback_url("/api/voice-ai/twilio/status"),
            recording_status_url: config.callback_url("/api/voice-ai/twilio/recording-status"),
            ring_timeout_secs: config.ring_timeout_secs,
            machine_detection_timeout_secs: config.machine_detection_timeout_secs,
            record: config.record,
        }
    }

    /// Form body of the provider's create-call request
    pub fn form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("To", self.to.clone()),
            ("From", self.from.clone()),
            ("Url", self.answer_url.clone()),
            ("StatusCallback", self.status_url.clone()),
            ("Timeout", self.ring_timeout_secs.to_string()),
            ("MachineDetection", "Enable".to_string()),
            (
                "MachineDetectionTimeout",
                self.machine_detection_timeout_secs.to_string(),
            ),
        ];
        for event in ["initiated", "ringing", "answered", "completed"] {
            form.push(("StatusCallbackEvent", event.to_string()));
        }
        if self.record {
            form.push(("Record", "true".to_string()));
            form.push(("RecordingStatusCallback", self.recording_status_url.clone()));
        }
        form
    }
}

#[async_trait]
pub trait Dialer: Send + Sync {
    /// Place the call; returns the provider call id
    async fn dial(&self, request: &DialRequest) -> Result<String, IntegrationError>;

    /// Replace the live call's instructions (used for warm transfer)
    async fn redirect(&self, call_sid: &str, twiml: &str) -> Result<(), IntegrationError>;

    async fn hangup(&self, call_sid: &str) -> Result<(), IntegrationError>;
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
}

/// Twilio-compatible REST dialer
pub struct TwilioDialer {
    client: Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl TwilioDialer {
    pub fn new(config: &TelephonyConfig) -> Result<Self, IntegrationError> {
        let (Some(account_sid), Some(auth_token)) = (&config.account_sid, &config.auth_token)
        else {
            return Err(IntegrationError::NotConfigured("telephony credentials"));
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| IntegrationError::Internal(e.to_string()))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            account_sid: account_sid.clone(),
            auth_token: auth_token.clone(),
        })
    }

    fn calls_url(&self) -> String {
        format!("{}/Accounts/{}/Calls.json", self.api_base, self.account_sid)
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/Accounts/{}/Calls/{}.json",
            self.api_base, self.account_sid, call_sid
        )
    }

    async fn update_call(
        &self,
        call_sid: &str,
        form: &[(&str, &str)],
    ) -> Result<(), IntegrationError> {
        let response = self
            .client
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl Dialer for TwilioDialer {
    async fn dial(&self, request: &DialRequest) -> Result<String, IntegrationError> {
        let response = self
            .client
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&request.form())
            .send()
            .await?;
        let call: CallResource = check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| IntegrationError::Internal(format!("invalid call resource: {}", e)))?;
        tracing::info!(call_sid = %call.sid, to = %request.to, "Outbound call placed");
        Ok(call.sid)
    }

    async fn redirect(&self, call_sid: &str, twiml: &str) -> Result<(), IntegrationError> {
        self.update_call(call_sid, &[("Twiml", twiml)]).await?;
        tracing::info!(call_sid = %call_sid, "Call redirected");
        Ok(())
    }

    async fn hangup(&self, call_sid: &str) -> Result<(), IntegrationError> {
        self.update_call(call_sid, &[("Status", "completed")]).await?;
        tracing::info!(call_sid = %call_sid, "Call hung up");
        Ok(())
    }
}

/// Dialer that only logs; used without telephony credentials
#[derive(Debug, Default)]
pub struct StubDialer;

#[async_trait]
impl Dialer for StubDialer {
    async fn dial(&self, request: &DialRequest) -> Result<String, IntegrationError> {
        let sid = format!("CA{}", uuid::Uuid::new_v4().simple());
        tracing::info!(call_sid = %sid, to = %request.to, "Stub dialer: call placed");
        Ok(sid)
    }

    async fn redirect(&self, call_sid: &str, _twiml: &str) -> Result<(), IntegrationError> {
        tracing::info!(call_sid = %call_sid, "Stub dialer: call redirected");
        Ok(())
    }

    async fn hangup(&self, call_sid: &str) -> Result<(), IntegrationError> {
        tracing::info!(call_sid = %call_sid, "Stub dialer: call hung up");
        Ok(())
    }
}
