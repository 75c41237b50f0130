//! Post-call messages to the lead

use async_trait::async_trait;
use chrono::{Datelike, Weekday};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::scheduling::parse_meeting_date;
use crate::{check_response, IntegrationError};

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, phone: &str, text: &str) -> Result<(), IntegrationError>;
}

fn weekday_pt(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "segunda",
        Weekday::Tue => "terça",
        Weekday::Wed => "quarta",
        Weekday::Thu => "quinta",
        Weekday::Fri => "sexta",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

/// `2026-02-20` or `20/02/2026` becomes `sexta, 20/02`; anything else is
/// returned unchanged
pub fn format_date_pt(date: &str) -> String {
    match parse_meeting_date(date) {
        Some(d) => format!("{}, {}", weekday_pt(d.weekday()), d.format("%d/%m")),
        None => date.to_string(),
    }
}

pub fn schedule_confirmation_text(lead_name: &str, course: &str, date: &str, time: &str) -> String {
    format!(
        "✅ *Agendamento Confirmado*\n\n\
         Oi, {lead_name}! 👋\n\n\
         Sua conversa sobre o curso de *{course}* está marcada:\n\n\
         📅 *{date}* às *{time}*\n\
         📞 Nossa consultora vai te ligar nesse horário.\n\n\
         Qualquer coisa, é só responder aqui! 😊",
        date = format_date_pt(date),
    )
}

pub fn follow_up_text(lead_name: &str, agent_name: &str, course: &str) -> String {
    format!(
        "Oi, {lead_name}! 👋\n\n\
         Aqui é a {agent_name}, da equipe de atendimento. Acabamos de conversar sobre o curso de *{course}*.\n\n\
         Fico à disposição pra qualquer dúvida! Se quiser agendar uma conversa mais detalhada \
         com nossa consultora, é só me responder aqui. 😊\n\n\
         Bons estudos! 📚"
    )
}

/// JSON messaging gateway
pub struct HttpMessenger {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpMessenger {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, IntegrationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| IntegrationError::Internal(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl Messenger for HttpMessenger {
    async fn send_text(&self, phone: &str, text: &str) -> Result<(), IntegrationError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "to": phone, "type": "text", "text": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        check_response(request.send().await?).await?;
        tracing::info!(phone = %phone, chars = text.chars().count(), "Message sent");
        Ok(())
    }
}

/// Messenger that logs instead of sending
#[derive(Debug, Default)]
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send_text(&self, phone: &str, text: &str) -> Result<(), IntegrationError> {
        tracing::info!(phone = %phone, text = %text, "Log messenger: message not sent");
        Ok(())
    }
}
