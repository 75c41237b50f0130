//! Scripted chat backend for unit tests

use async_trait::async_trait;
use std::sync::Mutex;

use voice_qualifier_llm::{FinishReason, GenerationResult, LlmBackend, LlmError, Message};

pub struct ScriptedBackend {
    reply: Option<String>,
    seen: Mutex<Vec<Message>>,
}

impl ScriptedBackend {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn last_messages(&self) -> Vec<Message> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
        *self.seen.lock().unwrap() = messages.to_vec();
        match &self.reply {
            Some(text) => Ok(GenerationResult {
                text: text.clone(),
                tokens: 0,
                total_time_ms: 1,
                finish_reason: FinishReason::Stop,
            }),
            None => Err(LlmError::Network("connection refused".to_string())),
        }
    }

    async fn is_available(&self) -> bool {
        self.reply.is_some()
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
