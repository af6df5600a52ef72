//! Recorder
//!
//! Persists the event log and consequence records. Each write touches a
//! single record; there is no transaction spanning create and
//! mark-executed.

mod database;
mod events;
mod memory;
mod sqlite;

pub use events::{MemoryEventStore, SqliteEventStore};
pub use memory::MemoryConsequenceStore;
pub use sqlite::SqliteConsequenceStore;

use async_trait::async_trait;
use hub_core::{Consequence, ConsequenceStatus, Event};
use std::sync::Arc;
use thiserror::Error;

/// Recorder errors
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("consequence already recorded for event {event_id} and rule {rule_id}")]
    Conflict { event_id: String, rule_id: String },

    #[error("consequence not found: {0}")]
    NotFound(String),

    #[error("consequence {id} is {actual}, expected {expected}")]
    StatusChanged {
        id: String,
        expected: ConsequenceStatus,
        actual: ConsequenceStatus,
    },

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Result type for recorder operations
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Persistence for consequence records
#[async_trait]
pub trait ConsequenceStore: Send + Sync {
    /// Insert a new record.
    ///
    /// Fails with `Conflict` if a record for the same (event, rule) pair exists.
    async fn insert(&self, consequence: &Consequence) -> RecorderResult<()>;

    /// Load a record by id
    async fn get(&self, id: &str) -> RecorderResult<Option<Consequence>>;

    /// Overwrite a record whose stored status is still `expected`.
    ///
    /// The status check and the write are one atomic step. Fails with
    /// `NotFound` if no record has this id and with `StatusChanged` if
    /// another writer moved the record first.
    async fn update(
        &self,
        consequence: &Consequence,
        expected: ConsequenceStatus,
    ) -> RecorderResult<()>;

    /// All records in creation order
    async fn find_all(&self) -> RecorderResult<Vec<Consequence>>;

    /// Records produced by one event, in creation order
    async fn find_by_event(&self, event_id: &str) -> RecorderResult<Vec<Consequence>>;

    /// The record for an (event, rule) pair, if any
    async fn find_by_event_and_rule(
        &self,
        event_id: &str,
        rule_id: &str,
    ) -> RecorderResult<Option<Consequence>>;
}

/// Shared handle to a consequence store
pub type SharedConsequenceStore = Arc<dyn ConsequenceStore>;

/// Log of every event taken off the queue
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Record an event.
    ///
    /// Recording an id that is already present is a no-op; returns whether
    /// the event was new.
    async fn record(&self, event: &Event) -> RecorderResult<bool>;

    /// Load an event by id
    async fn get(&self, id: &str) -> RecorderResult<Option<Event>>;

    /// All events in recording order
    async fn find_all(&self) -> RecorderResult<Vec<Event>>;

    /// Events reported by one device, in recording order
    async fn find_by_device(&self, device_id: &str) -> RecorderResult<Vec<Event>>;
}

/// Shared handle to an event store
pub type SharedEventStore = Arc<dyn EventStore>;
