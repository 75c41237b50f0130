//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use voice_qualifier_core::{CallScript, QualificationPolicy};

use crate::constants::{call, endpoints, realtime, retry, telephony, timeouts};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Relaxed validation
    #[default]
    Development,
    Staging,
    /// Credentials and public URLs must be set
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Streaming speech model
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Chat completions (summary, QA, request/response agent)
    #[serde(default)]
    pub llm: LlmConfig,

    /// Per-call limits
    #[serde(default)]
    pub call: CallConfig,

    /// Required fields, score weights, threshold
    #[serde(default)]
    pub qualification: QualificationPolicy,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub telephony: TelephonyConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    #[serde(default)]
    pub messaging: MessagingConfig,

    #[serde(default)]
    pub crm: CrmConfig,

    #[serde(default)]
    pub scheduling: SchedulingConfig,

    /// Call scripts; course-specific ones win over generic ones
    #[serde(default)]
    pub scripts: Vec<CallScript>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_realtime()?;
        self.validate_llm()?;
        self.validate_call()?;
        self.validate_qualification()?;
        self.validate_retry()?;
        self.validate_production()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }
        if self.server.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.timeout_seconds".to_string(),
                message: "Timeout must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }

    fn validate_realtime(&self) -> Result<(), ConfigError> {
        let rt = &self.realtime;
        if !(0.25..=1.5).contains(&rt.speed) {
            return Err(ConfigError::InvalidValue {
                field: "realtime.speed".to_string(),
                message: format!("Must be between 0.25 and 1.5, got {}", rt.speed),
            });
        }
        if !matches!(rt.vad_eagerness.as_str(), "low" | "medium" | "high" | "auto") {
            return Err(ConfigError::InvalidValue {
                field: "realtime.vad_eagerness".to_string(),
                message: format!("Unknown eagerness '{}'", rt.vad_eagerness),
            });
        }
        if rt.configure_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "realtime.configure_timeout_ms".to_string(),
                message: "Must be at least 1ms".to_string(),
            });
        }
        Ok(())
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm.temperature".to_string(),
                message: format!("Must be between 0.0 and 2.0, got {}", self.llm.temperature),
            });
        }
        if self.llm.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.max_tokens".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn validate_call(&self) -> Result<(), ConfigError> {
        if self.call.max_duration_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "call.max_duration_secs".to_string(),
                message: "Max call duration must be at least 1 second".to_string(),
            });
        }
        if self.scheduling.meeting_minutes <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduling.meeting_minutes".to_string(),
                message: "Meetings must last at least 1 minute".to_string(),
            });
        }
        Ok(())
    }

    fn validate_qualification(&self) -> Result<(), ConfigError> {
        self.qualification
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                field: "qualification".to_string(),
                message: e.to_string(),
            })
    }

    fn validate_retry(&self) -> Result<(), ConfigError> {
        if self.retry.delay_minutes.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "retry.delay_minutes".to_string(),
                message: "Retry schedule cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    fn validate_production(&self) -> Result<(), ConfigError> {
        if !self.environment.is_production() {
            return Ok(());
        }
        if self.realtime.api_key.is_none() {
            return Err(ConfigError::MissingField("realtime.api_key".to_string()));
        }
        if !self.telephony.public_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "telephony.public_base_url".to_string(),
                message: "Must be an https URL in production".to_string(),
            });
        }
        if self.server.cors_enabled && self.server.cors_origins.is_empty() {
            tracing::warn!("CORS is enabled in production but no origins are configured");
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout for plain HTTP routes
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Empty means any origin outside production
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_seconds: default_timeout(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// Install the Prometheus recorder and serve `/metrics`
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Streaming speech model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_realtime_endpoint")]
    pub endpoint: String,

    /// Falls back to `OPENAI_API_KEY`
    #[serde(default = "default_openai_api_key")]
    pub api_key: Option<String>,

    #[serde(default = "default_realtime_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_speed")]
    pub speed: f32,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    #[serde(default = "default_transcription_language")]
    pub transcription_language: String,

    /// Semantic VAD eagerness: low, medium, high or auto
    #[serde(default = "default_vad_eagerness")]
    pub vad_eagerness: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_configure_timeout")]
    pub configure_timeout_ms: u64,

    /// How long audio keeps flowing after the agent ends the call
    #[serde(default = "default_end_call_grace")]
    pub end_call_grace_ms: u64,
}

fn default_realtime_endpoint() -> String {
    endpoints::REALTIME_DEFAULT.to_string()
}
fn default_openai_api_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
}
fn default_realtime_model() -> String {
    realtime::MODEL.to_string()
}
fn default_voice() -> String {
    realtime::VOICE.to_string()
}
fn default_speed() -> f32 {
    realtime::SPEED
}
fn default_transcription_model() -> String {
    realtime::TRANSCRIPTION_MODEL.to_string()
}
fn default_transcription_language() -> String {
    realtime::TRANSCRIPTION_LANGUAGE.to_string()
}
fn default_vad_eagerness() -> String {
    realtime::VAD_EAGERNESS.to_string()
}
fn default_connect_timeout() -> u64 {
    timeouts::REALTIME_CONNECT_MS
}
fn default_configure_timeout() -> u64 {
    timeouts::REALTIME_CONFIGURE_MS
}
fn default_end_call_grace() -> u64 {
    timeouts::END_CALL_GRACE_MS
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_realtime_endpoint(),
            api_key: default_openai_api_key(),
            model: default_realtime_model(),
            voice: default_voice(),
            speed: default_speed(),
            transcription_model: default_transcription_model(),
            transcription_language: default_transcription_language(),
            vad_eagerness: default_vad_eagerness(),
            connect_timeout_ms: default_connect_timeout(),
            configure_timeout_ms: default_configure_timeout(),
            end_call_grace_ms: default_end_call_grace(),
        }
    }
}

/// Chat completion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_openai_api_key")]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_timeout")]
    pub timeout_ms: u64,
}

fn default_llm_endpoint() -> String {
    endpoints::OPENAI_DEFAULT.to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    400
}
fn default_llm_timeout() -> u64 {
    timeouts::LLM_REQUEST_MS
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: default_openai_api_key(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_llm_timeout(),
        }
    }
}

/// Per-call limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Hard ceiling; the relay ends the call when it is reached
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
}

fn default_max_duration() -> u64 {
    call::MAX_DURATION_SECS
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration(),
        }
    }
}

/// Redial policy for busy and unanswered calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first dial
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delay_minutes")]
    pub delay_minutes: Vec<u64>,
}

fn default_max_attempts() -> u32 {
    retry::MAX_ATTEMPTS
}
fn default_delay_minutes() -> Vec<u64> {
    retry::DELAY_MINUTES.to_vec()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_minutes: default_delay_minutes(),
        }
    }
}

impl RetryConfig {
    /// Delay before redialing after `attempt` (1-based) failed
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let idx = (attempt as usize).min(self.delay_minutes.len().saturating_sub(1));
        let minutes = self.delay_minutes.get(idx).copied().unwrap_or(0);
        std::time::Duration::from_secs(minutes * 60)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Outbound telephony configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    #[serde(default = "default_twilio_api")]
    pub api_base: String,

    #[serde(default = "default_env_account_sid")]
    pub account_sid: Option<String>,

    #[serde(default = "default_env_auth_token")]
    pub auth_token: Option<String>,

    /// Caller id for outbound calls
    #[serde(default)]
    pub from_number: String,

    /// Closer line for warm transfers; `from_number` when unset
    #[serde(default)]
    pub transfer_number: Option<String>,

    /// Public URL the provider calls back (answer, status, stream)
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default = "default_ring_timeout")]
    pub ring_timeout_secs: u32,

    #[serde(default = "default_machine_detection_timeout")]
    pub machine_detection_timeout_secs: u32,

    #[serde(default = "default_true")]
    pub record: bool,

    /// Country code prepended to numbers without one
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
}

fn default_twilio_api() -> String {
    endpoints::TWILIO_API_DEFAULT.to_string()
}
fn default_env_account_sid() -> Option<String> {
    std::env::var("TWILIO_ACCOUNT_SID").ok().filter(|v| !v.is_empty())
}
fn default_env_auth_token() -> Option<String> {
    std::env::var("TWILIO_AUTH_TOKEN").ok().filter(|v| !v.is_empty())
}
fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_ring_timeout() -> u32 {
    telephony::RING_TIMEOUT_SECS
}
fn default_machine_detection_timeout() -> u32 {
    telephony::MACHINE_DETECTION_TIMEOUT_SECS
}
fn default_country_code() -> String {
    telephony::DEFAULT_COUNTRY_CODE.to_string()
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            api_base: default_twilio_api(),
            account_sid: default_env_account_sid(),
            auth_token: default_env_auth_token(),
            from_number: String::new(),
            transfer_number: None,
            public_base_url: default_public_base_url(),
            ring_timeout_secs: default_ring_timeout(),
            machine_detection_timeout_secs: default_machine_detection_timeout(),
            record: true,
            default_country_code: default_country_code(),
        }
    }
}

impl TelephonyConfig {
    /// Whether real dialing is possible
    pub fn has_credentials(&self) -> bool {
        self.account_sid.is_some() && self.auth_token.is_some()
    }

    /// Absolute callback URL for `path`
    pub fn callback_url(&self, path: &str) -> String {
        format!("{}{}", self.public_base_url.trim_end_matches('/'), path)
    }

    /// Destination dialed on warm transfer
    pub fn transfer_target(&self) -> &str {
        self.transfer_number
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.from_number)
    }

    /// Media stream URL (`http` becomes `ws`, `https` becomes `wss`)
    pub fn stream_url(&self, path: &str) -> String {
        let base = self.public_base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("wss://{}", base)
        };
        format!("{}{}", ws_base, path)
    }
}

/// Knowledge retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Retrieval service; `None` disables retrieval
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_knowledge_timeout")]
    pub timeout_ms: u64,

    /// Channel / tenant the knowledge base is scoped to
    #[serde(default)]
    pub tenant_id: Option<String>,
}

fn default_top_k() -> usize {
    3
}
fn default_knowledge_timeout() -> u64 {
    timeouts::KNOWLEDGE_MS
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            top_k: default_top_k(),
            timeout_ms: default_knowledge_timeout(),
            tenant_id: None,
        }
    }
}

/// Messaging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Send confirmation and follow-up messages after the call
    #[serde(default = "default_true")]
    pub followup_enabled: bool,

    /// Messaging gateway; `None` logs instead of sending
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            followup_enabled: true,
            endpoint: None,
            api_key: None,
        }
    }
}

/// CRM configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrmConfig {
    /// CRM API; `None` logs instead of updating
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,
}

/// Meeting calendar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Calendar API; `None` keeps bookings local and skips confirmations
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_calendar")]
    pub calendar: String,

    /// Closer named in the event and in the stored booking
    #[serde(default = "default_closer")]
    pub closer: String,

    #[serde(default = "default_meeting_minutes")]
    pub meeting_minutes: i64,
}

fn default_calendar() -> String {
    "victoria".to_string()
}
fn default_closer() -> String {
    "Victoria".to_string()
}
fn default_meeting_minutes() -> i64 {
    call::MEETING_MINUTES
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            calendar: default_calendar(),
            closer: default_closer(),
            meeting_minutes: default_meeting_minutes(),
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (VOICE_QUALIFIER_ prefix, `__` separator)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Same as [`load_settings`] with an explicit config directory
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    let default_path = dir.join("default");
    builder = builder.add_source(File::with_name(&default_path.to_string_lossy()).required(false));

    if let Some(env_name) = env {
        let env_path = dir.join(env_name);
        builder =
            builder.add_source(File::with_name(&env_path.to_string_lossy()).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_QUALIFIER")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
