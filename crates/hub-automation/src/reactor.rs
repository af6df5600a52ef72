//! Reactor
//!
//! The single consumer of the event queue. Each iteration:
//!
//! 1. waits for the next event (`Waiting`)
//! 2. deserializes and records it in the event log, matches it against the
//!    rules, and for every match records a consequence, dispatches the
//!    action and marks it executed (`Processing`)
//! 3. acknowledges the delivery, or returns it to the queue when a
//!    retryable failure occurred
//!
//! Shutdown is only observed while waiting; an event that is being
//! processed always runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hub_core::{Consequence, Event, Rule};
use hub_event_queue::{Delivery, QueueError, SharedEventQueue};
use hub_recorder::{SharedConsequenceStore, SharedEventStore};
use hub_registries::SharedRuleStore;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::{LoggingDispatcher, SharedDispatcher};
use crate::lifecycle::{ConsequenceLifecycle, LifecycleError, LifecycleResult};
use crate::matcher::{MatchError, RuleMatcher};

/// Reactor tuning
#[derive(Debug, Clone, PartialEq)]
pub struct ReactorSettings {
    /// Deliveries of one event before it is dropped
    pub max_deliveries: u32,

    /// Pause before redelivering a failed event or after a queue error
    pub retry_delay: Duration,
}

impl Default for ReactorSettings {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Everything the reactor depends on
#[derive(Clone)]
pub struct ReactorContext {
    pub queue: SharedEventQueue,
    pub rules: SharedRuleStore,
    pub consequences: SharedConsequenceStore,
    pub events: SharedEventStore,
    pub dispatcher: SharedDispatcher,
    pub settings: ReactorSettings,
}

impl ReactorContext {
    /// Context with the logging dispatcher and default settings
    pub fn new(
        queue: SharedEventQueue,
        rules: SharedRuleStore,
        consequences: SharedConsequenceStore,
        events: SharedEventStore,
    ) -> Self {
        Self {
            queue,
            rules,
            consequences,
            events,
            dispatcher: Arc::new(LoggingDispatcher),
            settings: ReactorSettings::default(),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: SharedDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_settings(mut self, settings: ReactorSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Observable loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    /// Blocked on the queue
    Waiting,
    /// Handling one event
    Processing,
}

/// A matched rule that could not be applied
#[derive(Debug)]
pub struct RuleFailure {
    pub rule_id: String,
    pub error: LifecycleError,
}

/// Result of processing one event
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// Number of rules the event matched
    pub matched: usize,
    /// Consequences executed during this pass, in rule order
    pub executed: Vec<Consequence>,
    /// Matches whose consequence was already executed by an earlier delivery
    pub already_executed: usize,
    /// Matches that failed
    pub failures: Vec<RuleFailure>,
}

impl ProcessOutcome {
    /// Whether a failure may succeed if the event is delivered again
    pub fn needs_redelivery(&self) -> bool {
        self.failures.iter().any(|f| f.error.is_retryable())
    }
}

/// The per-event pipeline shared between the reactor and its task
struct Pipeline {
    queue: SharedEventQueue,
    events: SharedEventStore,
    matcher: RuleMatcher,
    lifecycle: ConsequenceLifecycle,
    dispatcher: SharedDispatcher,
    settings: ReactorSettings,
    state: watch::Sender<ReactorState>,
}

impl Pipeline {
    async fn process_event(&self, event: &Event) -> Result<ProcessOutcome, MatchError> {
        let matched = self.matcher.matches(event).await?;
        let mut outcome = ProcessOutcome {
            matched: matched.len(),
            ..Default::default()
        };

        for rule in &matched {
            match self.apply_rule(event, rule).await {
                Ok(Some(consequence)) => outcome.executed.push(consequence),
                Ok(None) => outcome.already_executed += 1,
                Err(error) => {
                    error!(
                        event_id = %event.id,
                        rule_id = %rule.id,
                        error = %error,
                        "Failed to apply rule"
                    );
                    outcome.failures.push(RuleFailure {
                        rule_id: rule.id.clone(),
                        error,
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Returns `None` when an earlier delivery already executed this match
    async fn apply_rule(
        &self,
        event: &Event,
        rule: &Rule,
    ) -> LifecycleResult<Option<Consequence>> {
        let consequence = self.lifecycle.create(event, rule).await?;
        if consequence.is_executed() {
            debug!(consequence_id = %consequence.id, "Skipping executed consequence");
            return Ok(None);
        }

        self.dispatcher
            .dispatch(&consequence.device_id, &consequence.action)
            .await;

        let executed = self.lifecycle.mark_executed(&consequence.id).await?;
        Ok(Some(executed))
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let event: Event = match serde_json::from_str(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(tag = delivery.tag, error = %e, "Dropping malformed event payload");
                self.ack(&delivery).await;
                return;
            }
        };

        if delivery.is_redelivery() {
            info!(
                event_id = %event.id,
                attempts = delivery.attempts,
                "Processing redelivered event"
            );
        }

        let retry = match self.events.record(&event).await {
            Ok(_) => self.process_recorded(&event).await,
            Err(e) => {
                error!(event_id = %event.id, error = %e, "Failed to record event");
                true
            }
        };

        if !retry {
            self.ack(&delivery).await;
            return;
        }

        if delivery.attempts >= self.settings.max_deliveries {
            error!(
                event_id = %event.id,
                attempts = delivery.attempts,
                "Event failed too many times, dropping"
            );
            self.ack(&delivery).await;
            return;
        }

        warn!(
            event_id = %event.id,
            attempts = delivery.attempts,
            "Event will be redelivered"
        );
        tokio::time::sleep(self.settings.retry_delay).await;
        if let Err(e) = self.queue.nack(&delivery).await {
            error!(tag = delivery.tag, error = %e, "Failed to return event to queue");
        }
    }

    /// Match and apply a logged event; returns whether it needs redelivery
    async fn process_recorded(&self, event: &Event) -> bool {
        match self.process_event(event).await {
            Ok(outcome) => {
                debug!(
                    event_id = %event.id,
                    matched = outcome.matched,
                    executed = outcome.executed.len(),
                    failed = outcome.failures.len(),
                    "Processed event"
                );
                outcome.needs_redelivery()
            }
            Err(e) => {
                error!(event_id = %event.id, error = %e, "Failed to match event");
                true
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery).await {
            error!(tag = delivery.tag, error = %e, "Failed to acknowledge event");
        }
    }
}

/// Consumer loop turning queued events into executed consequences
pub struct Reactor {
    pipeline: Arc<Pipeline>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    pub fn new(ctx: ReactorContext) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (state, _) = watch::channel(ReactorState::Waiting);

        let pipeline = Pipeline {
            queue: ctx.queue,
            events: ctx.events,
            matcher: RuleMatcher::new(ctx.rules),
            lifecycle: ConsequenceLifecycle::new(ctx.consequences),
            dispatcher: ctx.dispatcher,
            settings: ctx.settings,
            state,
        };

        Self {
            pipeline: Arc::new(pipeline),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    pub fn matcher(&self) -> &RuleMatcher {
        &self.pipeline.matcher
    }

    pub fn lifecycle(&self) -> &ConsequenceLifecycle {
        &self.pipeline.lifecycle
    }

    /// Start consuming the queue on a background task
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Reactor already running");
            return;
        }

        info!("Starting reactor");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let pipeline = self.pipeline.clone();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            loop {
                pipeline.state.send_replace(ReactorState::Waiting);

                tokio::select! {
                    biased;

                    _ = shutdown_rx.recv() => {
                        info!("Received shutdown signal");
                        break;
                    }
                    result = pipeline.queue.dequeue() => {
                        match result {
                            Ok(delivery) => {
                                pipeline.state.send_replace(ReactorState::Processing);
                                pipeline.handle_delivery(delivery).await;
                            }
                            Err(QueueError::Closed) => {
                                info!("Event queue closed, stopping reactor");
                                break;
                            }
                            Err(e) => {
                                error!(error = %e, "Failed to dequeue event");
                                tokio::time::sleep(pipeline.settings.retry_delay).await;
                            }
                        }
                    }
                }
            }

            pipeline.state.send_replace(ReactorState::Waiting);
            running.store(false, Ordering::SeqCst);
            info!("Reactor stopped");
        });

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Signal the loop to stop once it is waiting for the next event
    pub fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        info!("Stopping reactor");
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for the loop task to finish
    pub async fn join(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Reactor task failed");
            }
        }
    }

    /// Stop and wait for the loop to finish
    pub async fn shutdown(&self) {
        self.stop();
        self.join().await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ReactorState {
        *self.pipeline.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReactorState> {
        self.pipeline.state.subscribe()
    }

    /// Process one event directly, bypassing the queue
    pub async fn process_event(&self, event: &Event) -> Result<ProcessOutcome, MatchError> {
        self.pipeline.process_event(event).await
    }
}
