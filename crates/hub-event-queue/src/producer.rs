//! Event ingestion onto the queue

use hub_core::{Event, NewEvent};
use tracing::{error, info};

use crate::{QueueResult, SharedEventQueue};

/// Serializes events and appends them to the queue
#[derive(Clone)]
pub struct EventProducer {
    queue: SharedEventQueue,
}

impl EventProducer {
    pub fn new(queue: SharedEventQueue) -> Self {
        Self { queue }
    }

    /// Enqueue an already-built event
    pub async fn publish(&self, event: &Event) -> QueueResult<()> {
        let payload = serde_json::to_string(event)?;
        self.queue.enqueue(payload).await?;
        info!(
            event_id = %event.id,
            device_id = %event.device_id,
            event_type = %event.event_type,
            "Event queued"
        );
        Ok(())
    }

    /// Assign an id to a new event and enqueue it, returning the error on failure
    pub async fn try_enqueue(&self, new_event: NewEvent) -> QueueResult<Event> {
        let event = new_event.into_event();
        self.publish(&event).await?;
        Ok(event)
    }

    /// Fire-and-forget enqueue.
    ///
    /// A failure is logged and swallowed: the event is lost and `None` is
    /// returned.
    pub async fn enqueue(&self, new_event: NewEvent) -> Option<Event> {
        let device_id = new_event.device_id.clone();
        let event_type = new_event.event_type.clone();

        match self.try_enqueue(new_event).await {
            Ok(event) => Some(event),
            Err(e) => {
                error!(
                    device_id = %device_id,
                    event_type = %event_type,
                    error = %e,
                    "Failed to queue event, event dropped"
                );
                None
            }
        }
    }
}
