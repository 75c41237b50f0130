//! Shared default values
//!
//! Settings defaults and the protocol layers read from here so a value is
//! declared once.

/// Service endpoints
pub mod endpoints {
    /// Realtime speech model WebSocket
    pub const REALTIME_DEFAULT: &str = "wss://api.openai.com/v1/realtime";

    /// Chat completions base URL
    pub const OPENAI_DEFAULT: &str = "https://api.openai.com/v1";

    /// Telephony REST API base URL
    pub const TWILIO_API_DEFAULT: &str = "https://api.twilio.com/2010-04-01";
}

/// Realtime session defaults
pub mod realtime {
    pub const MODEL: &str = "gpt-realtime";

    /// Warm female voice, best fit for pt-BR
    pub const VOICE: &str = "coral";

    pub const SPEED: f32 = 1.08;

    pub const TRANSCRIPTION_MODEL: &str = "gpt-4o-transcribe";

    pub const TRANSCRIPTION_LANGUAGE: &str = "pt";

    /// G.711 mu-law, the telephony stream codec
    pub const AUDIO_FORMAT: &str = "audio/pcmu";

    pub const VAD_EAGERNESS: &str = "medium";
}

/// Timeouts
pub mod timeouts {
    /// Realtime WebSocket handshake
    pub const REALTIME_CONNECT_MS: u64 = 10_000;

    /// Wait for `session.updated` after sending the configuration
    pub const REALTIME_CONFIGURE_MS: u64 = 5_000;

    /// Trailing audio flush after the agent ends the call
    pub const END_CALL_GRACE_MS: u64 = 5_000;

    /// Chat completion request
    pub const LLM_REQUEST_MS: u64 = 30_000;

    /// Knowledge retrieval before call start
    pub const KNOWLEDGE_MS: u64 = 3_000;
}

/// Per-call limits
pub mod call {
    /// Hard ceiling on call duration
    pub const MAX_DURATION_SECS: u64 = 300;

    /// Length of a booked meeting with the closer
    pub const MEETING_MINUTES: i64 = 30;
}

/// Redial policy for unanswered calls
pub mod retry {
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Delay before attempt N+1, indexed by attempt N (clamped to the last entry)
    pub const DELAY_MINUTES: [u64; 3] = [5, 30, 120];
}

/// Outbound dial defaults
pub mod telephony {
    pub const RING_TIMEOUT_SECS: u32 = 30;

    pub const MACHINE_DETECTION_TIMEOUT_SECS: u32 = 5;

    /// Country code prepended to numbers without one
    pub const DEFAULT_COUNTRY_CODE: &str = "55";
}
