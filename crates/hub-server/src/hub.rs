//! Wiring of the hub's components

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use hub_api::AppState;
use hub_automation::{ConsequenceLifecycle, Reactor, ReactorContext, ReactorSettings};
use hub_config::{HubConfig, QueueBackend};
use hub_event_queue::{EventProducer, EventQueue, MemoryQueue, SharedEventQueue, SqliteQueue};
use hub_recorder::{
    SharedConsequenceStore, SharedEventStore, SqliteConsequenceStore, SqliteEventStore,
};
use hub_registries::{RuleRegistry, Storage};
use tracing::info;

/// The running hub
pub struct Hub {
    pub config: Arc<HubConfig>,
    pub queue: SharedEventQueue,
    pub rules: Arc<RuleRegistry>,
    pub consequences: SharedConsequenceStore,
    pub events: SharedEventStore,
    pub reactor: Reactor,
}

impl Hub {
    /// Open storage, recover the queue and build the reactor (not started)
    pub async fn build(config_dir: &Path, config: HubConfig) -> Result<Self> {
        let database = config.database_path(config_dir);
        if let Some(parent) = database.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let queue: SharedEventQueue = match config.queue.backend {
            QueueBackend::Memory => Arc::new(MemoryQueue::new()),
            QueueBackend::Sqlite => Arc::new(
                SqliteQueue::open(&database)
                    .context("failed to open event queue")?
                    .with_poll_interval(config.queue.poll_interval()),
            ),
        };
        // Events leased by a previous run that never finished them
        queue.recover().await.context("failed to recover event queue")?;

        let storage = Arc::new(Storage::new(config.storage_dir(config_dir)));
        let rules = Arc::new(RuleRegistry::new(storage));
        rules.load().await.context("failed to load rules")?;

        let consequences: SharedConsequenceStore = Arc::new(
            SqliteConsequenceStore::open(&database).context("failed to open consequence store")?,
        );
        let events: SharedEventStore =
            Arc::new(SqliteEventStore::open(&database).context("failed to open event log")?);

        let settings = ReactorSettings {
            max_deliveries: config.queue.max_deliveries,
            retry_delay: config.queue.retry_delay(),
        };
        let ctx = ReactorContext::new(
            queue.clone(),
            rules.clone(),
            consequences.clone(),
            events.clone(),
        )
        .with_settings(settings);

        info!(
            backend = ?config.queue.backend,
            database = %database.display(),
            rules = rules.len(),
            "Hub initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            queue,
            rules,
            consequences,
            events,
            reactor: Reactor::new(ctx),
        })
    }

    /// State for the REST API
    pub fn app_state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            producer: EventProducer::new(self.queue.clone()),
            events: self.events.clone(),
            rules: self.rules.clone(),
            consequences: ConsequenceLifecycle::new(self.consequences.clone()),
        }
    }
}
