//! Lifecycle phase of one relay

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelinePhase {
    Idle,
    Connecting,
    Configuring,
    /// Greeting requested; turn detection suspended
    Greeting,
    /// Turn detection re-armed, normal conversation
    Active,
    Finalizing,
    Done,
    /// Failed; always followed by FINALIZING
    Error,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Idle => "IDLE",
            PipelinePhase::Connecting => "CONNECTING",
            PipelinePhase::Configuring => "CONFIGURING",
            PipelinePhase::Greeting => "GREETING",
            PipelinePhase::Active => "ACTIVE",
            PipelinePhase::Finalizing => "FINALIZING",
            PipelinePhase::Done => "DONE",
            PipelinePhase::Error => "ERROR",
        }
    }

    /// Failed before any audio was relayed
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            PipelinePhase::Idle | PipelinePhase::Connecting | PipelinePhase::Configuring
        )
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
