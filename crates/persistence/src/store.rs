//! Call store
//!
//! Records are keyed by id with a secondary index on the provider call id.
//! Updates run as closures under the entry lock so concurrent callbacks
//! (status webhook, stream finalize) never overwrite each other's fields.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::calls::CallRecord;
use crate::PersistenceError;

/// Mutation applied to a stored record
pub type CallUpdate = Box<dyn FnOnce(&mut CallRecord) -> Result<(), PersistenceError> + Send>;

#[async_trait]
pub trait CallStore: Send + Sync {
    async fn create(&self, record: CallRecord) -> Result<(), PersistenceError>;

    async fn get(&self, id: Uuid) -> Result<Option<CallRecord>, PersistenceError>;

    async fn find_by_provider_sid(&self, sid: &str)
        -> Result<Option<CallRecord>, PersistenceError>;

    /// Attach the provider call id once the dial is accepted
    async fn set_provider_sid(&self, id: Uuid, sid: &str) -> Result<(), PersistenceError>;

    /// Apply `update` atomically and return the updated record
    async fn update(&self, id: Uuid, update: CallUpdate) -> Result<CallRecord, PersistenceError>;
}

/// Process-local store
#[derive(Clone, Default)]
pub struct InMemoryCallStore {
    records: Arc<DashMap<Uuid, CallRecord>>,
    by_sid: Arc<DashMap<String, Uuid>>,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CallStore for InMemoryCallStore {
    async fn create(&self, record: CallRecord) -> Result<(), PersistenceError> {
        let id = record.id;
        if self.records.contains_key(&id) {
            return Err(PersistenceError::Duplicate(id));
        }
        if let Some(sid) = &record.provider_call_sid {
            self.by_sid.insert(sid.clone(), id);
        }
        self.records.insert(id, record);
        tracing::debug!(call_id = %id, "Call record created");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CallRecord>, PersistenceError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_provider_sid(
        &self,
        sid: &str,
    ) -> Result<Option<CallRecord>, PersistenceError> {
        let Some(id) = self.by_sid.get(sid).map(|id| *id) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn set_provider_sid(&self, id: Uuid, sid: &str) -> Result<(), PersistenceError> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;
        if let Some(previous) = record.provider_call_sid.replace(sid.to_string()) {
            self.by_sid.remove(&previous);
        }
        record.updated_at = Utc::now();
        self.by_sid.insert(sid.to_string(), id);
        Ok(())
    }

    async fn update(&self, id: Uuid, update: CallUpdate) -> Result<CallRecord, PersistenceError> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;
        update(&mut *record)?;
        record.updated_at = Utc::now();
        Ok(record.value().clone())
    }
}
