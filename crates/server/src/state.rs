//! Application State
//!
//! Shared state across all handlers.

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use voice_qualifier_agent::{
    CallSummarizer, DisabledSummarizer, LlmSummarizer, Persona, QaEvaluator, StructuredResponder,
};
use voice_qualifier_config::Settings;
use voice_qualifier_core::QualificationPolicy;
use voice_qualifier_integrations::Integrations;
use voice_qualifier_llm::{LlmBackend, OpenAIBackend, OpenAIConfig};
use voice_qualifier_persistence::{CallStore, InMemoryCallStore};
use voice_qualifier_pipeline::{
    ModelConnector, ModelLink, PipelineError, PipelineRegistry, RealtimeConnector,
};

use crate::rehearsal::Rehearsals;
use crate::ServerError;

/// QA grading runs cooler and shorter than conversation summaries
const QA_TEMPERATURE: f32 = 0.2;
const QA_MAX_TOKENS: usize = 300;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub store: Arc<dyn CallStore>,
    pub integrations: Integrations,
    /// Live relays, keyed by call id
    pub pipelines: PipelineRegistry,
    pub connector: Arc<dyn ModelConnector>,
    pub summarizer: Arc<dyn CallSummarizer>,
    /// `None` disables post-call QA
    pub qa: Option<Arc<QaEvaluator>>,
    /// Request/response agent behind rehearsals; `None` disables them
    pub responder: Option<Arc<StructuredResponder>>,
    pub rehearsals: Rehearsals,
    pub persona: Persona,
    pub policy: Arc<QualificationPolicy>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// In-memory store and stub integrations around `connector`
    pub fn new(config: Settings, connector: Arc<dyn ModelConnector>) -> Self {
        let policy = Arc::new(config.qualification.clone());
        Self {
            config: Arc::new(config),
            store: Arc::new(InMemoryCallStore::new()),
            integrations: Integrations::with_stubs(),
            pipelines: PipelineRegistry::new(),
            connector,
            summarizer: Arc::new(DisabledSummarizer),
            qa: None,
            responder: None,
            rehearsals: Rehearsals::default(),
            persona: Persona::default(),
            policy,
            metrics: None,
        }
    }

    /// Production wiring: realtime connector, chat backends and HTTP
    /// integrations, each degrading with a warning when unconfigured
    pub fn from_settings(config: Settings) -> Result<Self, ServerError> {
        let connector: Arc<dyn ModelConnector> =
            match RealtimeConnector::from_settings(&config.realtime) {
                Ok(connector) => Arc::new(connector),
                Err(e) => {
                    tracing::warn!(error = %e, "Realtime model unavailable, calls will end with an error outcome");
                    Arc::new(UnavailableModel(e.to_string()))
                }
            };

        let integrations = Integrations::from_settings(&config)?;

        let mut state = Self::new(config, connector).with_integrations(integrations);

        let summary_config = OpenAIConfig::from_settings(&state.config.llm);
        match OpenAIBackend::new(summary_config.clone()) {
            Ok(backend) => {
                let backend: Arc<dyn LlmBackend> = Arc::new(backend);
                state.summarizer = Arc::new(LlmSummarizer::new(backend.clone()));
                state.responder = Some(Arc::new(
                    StructuredResponder::new(backend).with_persona(state.persona.clone()),
                ));

                let qa_config = OpenAIConfig {
                    temperature: QA_TEMPERATURE,
                    max_tokens: QA_MAX_TOKENS,
                    ..summary_config
                };
                match OpenAIBackend::new(qa_config) {
                    Ok(qa_backend) => {
                        let qa_backend: Arc<dyn LlmBackend> = Arc::new(qa_backend);
                        state.qa = Some(Arc::new(QaEvaluator::new(qa_backend)));
                    }
                    Err(e) => tracing::warn!(error = %e, "QA review disabled"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Chat backend unavailable, summaries, QA and rehearsals disabled");
            }
        }

        Ok(state)
    }

    pub fn with_store(mut self, store: Arc<dyn CallStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_integrations(mut self, integrations: Integrations) -> Self {
        self.integrations = integrations;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn CallSummarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_qa(mut self, qa: Arc<QaEvaluator>) -> Self {
        self.qa = Some(qa);
        self
    }

    pub fn with_responder(mut self, responder: Arc<StructuredResponder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Current configuration
    pub fn get_config(&self) -> &Settings {
        &self.config
    }
}

/// Connector used when the realtime model is not configured; every
/// connection attempt fails, so the call is finalized with an error outcome
struct UnavailableModel(String);

#[async_trait]
impl ModelConnector for UnavailableModel {
    async fn connect(&self, _call_id: &str) -> Result<ModelLink, PipelineError> {
        Err(PipelineError::Connection(self.0.clone()))
    }
}
