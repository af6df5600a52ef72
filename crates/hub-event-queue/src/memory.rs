//! In-process queue backend
//!
//! Messages live only as long as the process. Useful for tests and for
//! single-process deployments that accept losing queued events on restart.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

use crate::{Delivery, EventQueue, QueueError, QueueResult};

#[derive(Debug, Clone)]
struct Message {
    seq: u64,
    payload: String,
    attempts: u32,
}

#[derive(Debug, Default)]
struct Inner {
    ready: VecDeque<Message>,
    leased: BTreeMap<u64, Message>,
    closed: bool,
}

/// In-memory FIFO queue with lease/ack semantics
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    /// Wakes a blocked `dequeue` when a message becomes ready
    ready_signal: Notify,
    next_seq: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ready_signal: Notify::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Stop accepting messages.
    ///
    /// Further enqueues fail with `QueueError::Closed`; `dequeue` fails once
    /// the ready messages are drained.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.ready_signal.notify_waiters();
        self.ready_signal.notify_one();
    }

    /// Number of messages currently leased
    pub async fn leased_len(&self) -> usize {
        self.inner.lock().await.leased.len()
    }

    /// Put a message back in sequence order
    fn requeue(ready: &mut VecDeque<Message>, message: Message) {
        let pos = ready
            .iter()
            .position(|m| m.seq > message.seq)
            .unwrap_or(ready.len());
        ready.insert(pos, message);
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn enqueue(&self, payload: String) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(QueueError::Closed);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        inner.ready.push_back(Message {
            seq,
            payload,
            attempts: 0,
        });
        drop(inner);

        trace!(seq, "Enqueued message");
        self.ready_signal.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Delivery> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(mut message) = inner.ready.pop_front() {
                    message.attempts += 1;
                    let delivery = Delivery {
                        tag: message.seq,
                        payload: message.payload.clone(),
                        attempts: message.attempts,
                    };
                    inner.leased.insert(message.seq, message);
                    return Ok(delivery);
                }
                if inner.closed {
                    return Err(QueueError::Closed);
                }
            }

            self.ready_signal.notified().await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .leased
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(QueueError::UnknownDelivery(delivery.tag))
    }

    async fn nack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let message = inner
            .leased
            .remove(&delivery.tag)
            .ok_or(QueueError::UnknownDelivery(delivery.tag))?;
        Self::requeue(&mut inner.ready, message);
        drop(inner);

        debug!(tag = delivery.tag, "Message returned for redelivery");
        self.ready_signal.notify_one();
        Ok(())
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.inner.lock().await.ready.len())
    }

    async fn recover(&self) -> QueueResult<usize> {
        let mut inner = self.inner.lock().await;
        let leased = std::mem::take(&mut inner.leased);
        let count = leased.len();
        for (_, message) in leased {
            Self::requeue(&mut inner.ready, message);
        }
        drop(inner);

        if count > 0 {
            debug!(count, "Recovered leased messages");
            self.ready_signal.notify_one();
        }
        Ok(count)
    }
}
