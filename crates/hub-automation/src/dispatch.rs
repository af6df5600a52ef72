//! Device action dispatch

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

/// Performs an action on a device.
///
/// Fire-and-forget: no confirmation from the device is awaited.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, device_id: &str, action: &str);
}

/// Shared handle to a dispatcher
pub type SharedDispatcher = Arc<dyn ActionDispatcher>;

/// Dispatcher that only logs the action, standing in for device transport
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDispatcher;

#[async_trait]
impl ActionDispatcher for LoggingDispatcher {
    async fn dispatch(&self, device_id: &str, action: &str) {
        info!(device_id, action, "Dispatching device action");
    }
}
