//! Process-wide lookup of in-flight relays
//!
//! Only management actions go through here. A relay never looks itself up;
//! it inserts its handle on attach and removes it in finalize.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use voice_qualifier_core::{CallState, FsmEngine, FsmError, TransitionRecord};

use crate::phase::PipelinePhase;

/// Management view of one relay
#[derive(Clone)]
pub struct PipelineHandle {
    call_id: String,
    engine: Arc<Mutex<FsmEngine>>,
    phase: watch::Receiver<PipelinePhase>,
}

impl PipelineHandle {
    pub(crate) fn new(
        call_id: String,
        engine: Arc<Mutex<FsmEngine>>,
        phase: watch::Receiver<PipelinePhase>,
    ) -> Self {
        Self {
            call_id,
            engine,
            phase,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn phase(&self) -> PipelinePhase {
        *self.phase.borrow()
    }

    pub fn state(&self) -> CallState {
        self.engine.lock().state()
    }

    /// Move the conversation to WARM_TRANSFER
    pub fn request_transfer(&self, reason: &str) -> Result<TransitionRecord, FsmError> {
        let mut engine = self.engine.lock();
        let record = engine.transition(CallState::WarmTransfer, Some(reason))?;
        engine.set_handoff_reason(reason);
        tracing::info!(call_id = %self.call_id, reason = %reason, "Transfer requested");
        Ok(record)
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("call_id", &self.call_id)
            .field("phase", &self.phase())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    inner: Arc<DashMap<String, PipelineHandle>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: PipelineHandle) {
        let call_id = handle.call_id.clone();
        if self.inner.insert(call_id.clone(), handle).is_some() {
            tracing::warn!(call_id = %call_id, "Replaced an existing pipeline registration");
        }
    }

    pub fn get(&self, call_id: &str) -> Option<PipelineHandle> {
        self.inner.get(call_id).map(|entry| entry.value().clone())
    }

    /// Returns whether an entry was removed
    pub fn remove(&self, call_id: &str) -> bool {
        self.inner.remove(call_id).is_some()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.inner.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
