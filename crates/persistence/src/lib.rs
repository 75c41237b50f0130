//! Call persistence for the voice qualifier
//!
//! Stores one record per dial attempt with:
//! - Provider status and timestamps
//! - The pipeline result and full transcript (stored once)
//! - Handoff data, QA review and an event timeline

pub mod calls;
pub mod error;
pub mod store;

pub use calls::{CallEvent, CallQa, CallRecord, CallStatus};
pub use error::PersistenceError;
pub use store::{CallStore, CallUpdate, InMemoryCallStore};
