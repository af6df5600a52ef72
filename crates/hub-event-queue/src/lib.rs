//! Event queue decoupling event ingestion from processing
//!
//! The queue is a FIFO channel of serialized events with lease/ack
//! delivery:
//!
//! - `dequeue` blocks until a message is ready and leases it
//! - `ack` removes a leased message for good
//! - `nack` returns a leased message to the front of the queue
//! - `recover` returns every leased message after a crash
//!
//! A message is therefore only lost once the consumer acknowledges it,
//! giving at-least-once delivery to a single consumer.

mod database;
mod memory;
mod producer;
mod sqlite;

pub use memory::MemoryQueue;
pub use producer::EventProducer;
pub use sqlite::SqliteQueue;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by queue backends
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("queue database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("event queue is closed")]
    Closed,

    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(u64),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// A leased queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Backend-assigned position, used to ack/nack
    pub tag: u64,
    /// Raw JSON payload as enqueued
    pub payload: String,
    /// How many times this message has been delivered, including this one
    pub attempts: u32,
}

impl Delivery {
    /// Whether this message was delivered before
    pub fn is_redelivery(&self) -> bool {
        self.attempts > 1
    }
}

/// A FIFO queue of serialized events
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Append a payload to the tail of the queue
    async fn enqueue(&self, payload: String) -> QueueResult<()>;

    /// Wait for the next ready message and lease it.
    ///
    /// Cancel-safe: dropping the future before it resolves leases nothing.
    async fn dequeue(&self) -> QueueResult<Delivery>;

    /// Remove a leased message permanently
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Return a leased message to the front of the queue for redelivery
    async fn nack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Number of messages ready for delivery
    async fn len(&self) -> QueueResult<usize>;

    /// Whether no message is ready for delivery
    async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Return all leased messages to the ready state.
    ///
    /// Only safe while no consumer holds a lease, i.e. at startup.
    async fn recover(&self) -> QueueResult<usize>;
}

/// Shared handle to a queue backend
pub type SharedEventQueue = Arc<dyn EventQueue>;
