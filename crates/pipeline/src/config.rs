//! Relay timing and realtime session configuration

use serde_json::{json, Value};
use std::time::Duration;

use voice_qualifier_config::constants::{call, realtime, timeouts};
use voice_qualifier_config::{CallConfig, RealtimeConfig};

use crate::frames::ClientEvent;

/// Timing limits for one relay
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub connect_timeout: Duration,
    /// Wait for `session.updated`
    pub configure_timeout: Duration,
    /// Hard ceiling on call length, measured from relay start
    pub max_call_duration: Duration,
    /// Trailing audio flush after the agent ends the call
    pub end_call_grace: Duration,
    pub session: SessionOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(timeouts::REALTIME_CONNECT_MS),
            configure_timeout: Duration::from_millis(timeouts::REALTIME_CONFIGURE_MS),
            max_call_duration: Duration::from_secs(call::MAX_DURATION_SECS),
            end_call_grace: Duration::from_millis(timeouts::END_CALL_GRACE_MS),
            session: SessionOptions::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_settings(realtime: &RealtimeConfig, call: &CallConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(realtime.connect_timeout_ms),
            configure_timeout: Duration::from_millis(realtime.configure_timeout_ms),
            max_call_duration: Duration::from_secs(call.max_duration_secs),
            end_call_grace: Duration::from_millis(realtime.end_call_grace_ms),
            session: SessionOptions::from_settings(realtime),
        }
    }
}

/// Audio, voice and turn-detection options sent in `session.update`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub transcription_model: String,
    pub transcription_language: String,
    pub vad_eagerness: String,
    pub audio_format: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: realtime::MODEL.to_string(),
            voice: realtime::VOICE.to_string(),
            speed: realtime::SPEED,
            transcription_model: realtime::TRANSCRIPTION_MODEL.to_string(),
            transcription_language: realtime::TRANSCRIPTION_LANGUAGE.to_string(),
            vad_eagerness: realtime::VAD_EAGERNESS.to_string(),
            audio_format: realtime::AUDIO_FORMAT.to_string(),
        }
    }
}

impl SessionOptions {
    pub fn from_settings(config: &RealtimeConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
            transcription_model: config.transcription_model.clone(),
            transcription_language: config.transcription_language.clone(),
            vad_eagerness: config.vad_eagerness.clone(),
            audio_format: realtime::AUDIO_FORMAT.to_string(),
        }
    }

    /// Semantic VAD that both starts and interrupts responses
    pub fn turn_detection(&self) -> Value {
        json!({
            "type": "semantic_vad",
            "eagerness": self.vad_eagerness,
            "create_response": true,
            "interrupt_response": true,
        })
    }

    /// Full session configuration
    pub fn session_update(&self, instructions: &str, tools: Vec<Value>) -> ClientEvent {
        ClientEvent::SessionUpdate {
            session: json!({
                "type": "realtime",
                "model": self.model,
                "output_modalities": ["audio"],
                "instructions": instructions,
                "audio": {
                    "input": {
                        "format": { "type": self.audio_format },
                        "transcription": {
                            "model": self.transcription_model,
                            "language": self.transcription_language,
                        },
                        "turn_detection": self.turn_detection(),
                    },
                    "output": {
                        "format": { "type": self.audio_format },
                        "voice": self.voice,
                        "speed": self.speed,
                    },
                },
                "tools": tools,
                "tool_choice": "auto",
            }),
        }
    }

    fn turn_detection_update(turn_detection: Value) -> ClientEvent {
        ClientEvent::SessionUpdate {
            session: json!({
                "type": "realtime",
                "audio": { "input": { "turn_detection": turn_detection } },
            }),
        }
    }

    /// Turn detection off, used for the greeting
    pub fn suspend_turn_detection(&self) -> ClientEvent {
        Self::turn_detection_update(Value::Null)
    }

    pub fn rearm_turn_detection(&self) -> ClientEvent {
        Self::turn_detection_update(self.turn_detection())
    }
}
