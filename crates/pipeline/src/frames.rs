//! Typed envelopes for both sides of the relay
//!
//! Audio payloads stay base64 strings end to end: frames are forwarded
//! verbatim, never decoded or transcoded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ── Telephony media stream ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StreamStart {
    /// Correlation id of the call record, passed as a stream parameter
    pub fn correlation_id(&self) -> Option<&str> {
        self.custom_parameters
            .get("call_sid")
            .map(String::as_str)
            .or(self.call_sid.as_deref())
    }
}

/// Frame received from the telephony stream
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyInbound {
    /// Some providers already name the stream here
    Connected {
        #[serde(default, rename = "streamSid")]
        stream_sid: Option<String>,
    },
    Start { start: StreamStart },
    Media { media: MediaPayload },
    Mark,
    Stop,
    #[serde(other)]
    Unknown,
}

impl TelephonyInbound {
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unparseable telephony frame");
            TelephonyInbound::Unknown
        })
    }

    pub fn connected(stream_sid: Option<&str>) -> Self {
        TelephonyInbound::Connected {
            stream_sid: stream_sid.map(str::to_string),
        }
    }

    pub fn media(payload: impl Into<String>) -> Self {
        TelephonyInbound::Media {
            media: MediaPayload {
                payload: payload.into(),
            },
        }
    }
}

/// Frame sent to the telephony stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutbound {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Flush audio already buffered on the telephony side
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl TelephonyOutbound {
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        TelephonyOutbound::Media {
            stream_sid: stream_sid.into(),
            media: MediaPayload {
                payload: payload.into(),
            },
        }
    }

    pub fn clear(stream_sid: impl Into<String>) -> Self {
        TelephonyOutbound::Clear {
            stream_sid: stream_sid.into(),
        }
    }
}

// ── Realtime model ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ConversationItem {
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

/// Command sent to the realtime model
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: Value },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioClear,
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "response.cancel")]
    ResponseCancel,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
}

impl ClientEvent {
    pub fn function_output(call_id: impl Into<String>, output: &Value) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<Value>,
}

impl ResponseInfo {
    /// The response carried an `end_call` function call
    pub fn requests_end_call(&self) -> bool {
        self.output.iter().any(|item| {
            item.get("type").and_then(Value::as_str) == Some("function_call")
                && item.get("name").and_then(Value::as_str) == Some("end_call")
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorInfo {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Event received from the realtime model
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: ResponseInfo,
    },
    #[serde(rename = "response.output_audio.delta", alias = "response.audio.delta")]
    AudioDelta {
        delta: String,
        #[serde(default)]
        response_id: Option<String>,
    },
    #[serde(
        rename = "response.output_audio_transcript.done",
        alias = "response.audio_transcript.done"
    )]
    AssistantTranscriptDone {
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    UserTranscriptCompleted {
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseInfo,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorInfo,
    },
    /// Raised by the connector, never sent by the model
    #[serde(skip_deserializing)]
    TransportError(String),
    #[serde(other)]
    Other,
}

impl ServerEvent {
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unparseable model event");
            ServerEvent::Other
        })
    }

    pub fn audio(delta: impl Into<String>) -> Self {
        ServerEvent::AudioDelta {
            delta: delta.into(),
            response_id: None,
        }
    }

    pub fn response_created() -> Self {
        ServerEvent::ResponseCreated {
            response: ResponseInfo::default(),
        }
    }

    pub fn response_done() -> Self {
        ServerEvent::ResponseDone {
            response: ResponseInfo::default(),
        }
    }

    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        ServerEvent::FunctionCallArgumentsDone {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}
