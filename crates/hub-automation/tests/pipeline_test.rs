//! End-to-end tests of the reaction pipeline
//!
//! Events go through the producer and the queue, the reactor consumes
//! them, and the resulting consequence records are checked.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hub_automation::{
    ActionDispatcher, ConsequenceLifecycle, LifecycleError, Reactor, ReactorContext,
    ReactorSettings, RuleMatcher,
};
use hub_core::{
    Consequence, ConsequenceStatus, Event, EventType, NewEvent, NewRule, Operator, Rule,
    RuleCondition,
};
use hub_event_queue::{EventProducer, EventQueue, MemoryQueue};
use hub_recorder::{ConsequenceStore, EventStore, MemoryConsequenceStore, MemoryEventStore};
use hub_registries::{RuleRegistry, Storage};
use tempfile::TempDir;

/// Dispatcher that remembers every action it was asked to perform
#[derive(Default)]
struct RecordingDispatcher {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingDispatcher {
    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, device_id: &str, action: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((device_id.to_string(), action.to_string()));
    }
}

struct Hub {
    _temp_dir: TempDir,
    registry: Arc<RuleRegistry>,
    queue: Arc<MemoryQueue>,
    store: Arc<MemoryConsequenceStore>,
    events: Arc<MemoryEventStore>,
    dispatcher: Arc<RecordingDispatcher>,
    producer: EventProducer,
    reactor: Reactor,
}

impl Hub {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));
        let registry = Arc::new(RuleRegistry::new(storage));
        let queue = Arc::new(MemoryQueue::new());
        let store = Arc::new(MemoryConsequenceStore::new());
        let events = Arc::new(MemoryEventStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());

        let ctx = ReactorContext::new(
            queue.clone(),
            registry.clone(),
            store.clone(),
            events.clone(),
        )
        .with_dispatcher(dispatcher.clone())
        .with_settings(ReactorSettings {
            max_deliveries: 3,
            retry_delay: Duration::from_millis(1),
        });

        Self {
            _temp_dir: temp_dir,
            registry,
            queue: queue.clone(),
            store,
            events,
            dispatcher,
            producer: EventProducer::new(queue),
            reactor: Reactor::new(ctx),
        }
    }

    fn add_rule(&self, rule: NewRule) -> Arc<Rule> {
        self.registry.create(rule).unwrap()
    }

    async fn send(&self, event_type: &str, measurements: &[(&str, f64)]) -> Event {
        self.producer
            .enqueue(NewEvent {
                device_id: "sensor-1".to_string(),
                event_type: EventType::new(event_type),
                measurements: measurements
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
                timestamp: None,
            })
            .await
            .unwrap()
    }

    /// Wait until every queued event has been consumed and acknowledged
    async fn drained(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.queue.is_empty().await.unwrap() && self.queue.leased_len().await == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue was not drained in time");
    }

    async fn consequences(&self) -> Vec<Consequence> {
        self.store.find_all().await.unwrap()
    }
}

fn heater_rule() -> NewRule {
    NewRule {
        name: "Heater".to_string(),
        trigger_type: EventType::new("temperature_change"),
        condition: RuleCondition::new("temperature", 28.0),
        operator: Operator::Gt,
        target_device_id: "device_123".to_string(),
        action: "turn_on_heater".to_string(),
    }
}

fn motion_rule(name: &str, operator: Operator, threshold: f64, action: &str) -> NewRule {
    NewRule {
        name: name.to_string(),
        trigger_type: EventType::new("motion_detected"),
        condition: RuleCondition::new("motion", threshold),
        operator,
        target_device_id: "light-1".to_string(),
        action: action.to_string(),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_scenario_a_matching_rule_executes() {
    let hub = Hub::new();
    let rule = hub.add_rule(heater_rule());
    hub.reactor.start();

    let event = hub.send("temperature_change", &[("temperature", 29.0)]).await;
    hub.drained().await;

    let records = hub.consequences().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.event_id, event.id);
    assert!(hub.events.get(&record.event_id).await.unwrap().is_some());
    assert_eq!(record.rule_id, rule.id);
    assert_eq!(record.action, "turn_on_heater");
    assert_eq!(record.device_id, "device_123");
    assert_eq!(record.status, ConsequenceStatus::Executed);
    assert!(record.executed_at.is_some());

    assert_eq!(
        hub.dispatcher.calls(),
        vec![("device_123".to_string(), "turn_on_heater".to_string())]
    );

    hub.reactor.shutdown().await;
}

#[tokio::test]
async fn test_scenario_b_below_threshold_no_consequence() {
    let hub = Hub::new();
    hub.add_rule(heater_rule());
    hub.reactor.start();

    hub.send("temperature_change", &[("temperature", 27.0)]).await;
    hub.drained().await;

    assert!(hub.consequences().await.is_empty());
    assert!(hub.dispatcher.calls().is_empty());
    // Unmatched events are still logged
    assert_eq!(hub.events.len().await, 1);

    hub.reactor.shutdown().await;
}

#[tokio::test]
async fn test_scenario_c_type_mismatch_no_consequence() {
    let hub = Hub::new();
    hub.add_rule(heater_rule());
    hub.reactor.start();

    hub.send("humidity_change", &[("temperature", 29.0)]).await;
    hub.drained().await;

    assert!(hub.consequences().await.is_empty());

    hub.reactor.shutdown().await;
}

#[tokio::test]
async fn test_scenario_d_only_matching_motion_rule_fires() {
    let hub = Hub::new();
    let hit = hub.add_rule(motion_rule("motion-on", Operator::Eq, 1.0, "turn_on_light"));
    hub.add_rule(motion_rule("motion-off", Operator::Eq, 0.0, "turn_off_light"));
    hub.reactor.start();

    hub.send("motion_detected", &[("motion", 1.0)]).await;
    hub.drained().await;

    let records = hub.consequences().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].rule_id, hit.id);
    assert_eq!(records[0].action, "turn_on_light");

    hub.reactor.shutdown().await;
}

#[tokio::test]
async fn test_scenario_e_batched_events_processed_in_order() {
    let hub = Hub::new();
    hub.add_rule(heater_rule());

    // Both events are queued before the reactor starts
    let e1 = hub.send("temperature_change", &[("temperature", 30.0)]).await;
    let e2 = hub.send("temperature_change", &[("temperature", 31.0)]).await;
    assert_eq!(hub.queue.len().await.unwrap(), 2);

    hub.reactor.start();
    hub.drained().await;

    let order: Vec<String> = hub
        .consequences()
        .await
        .into_iter()
        .map(|c| c.event_id)
        .collect();
    assert_eq!(order, vec![e1.id, e2.id]);

    hub.reactor.shutdown().await;
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_matching_agrees_with_definition() {
    let hub = Hub::new();
    let thresholds = [0.0, 28.0];
    let types = ["temperature_change", "humidity_change"];

    for trigger in types {
        for op in Operator::ALL {
            for threshold in thresholds {
                hub.add_rule(NewRule {
                    name: format!("{trigger} {op} {threshold}"),
                    trigger_type: EventType::new(trigger),
                    condition: RuleCondition::new("temperature", threshold),
                    operator: op,
                    target_device_id: "device_123".to_string(),
                    action: "noop".to_string(),
                });
            }
        }
    }

    let matcher = RuleMatcher::new(hub.registry.clone());
    let rules = hub.registry.all();

    for event_type in types {
        for value in [-1.0, 0.0, 27.9, 28.0, 28.1, 100.0] {
            let event = Event::new(
                "sensor-1",
                event_type,
                BTreeMap::from([("temperature".to_string(), value)]),
            );
            let matched: Vec<String> = matcher
                .matches(&event)
                .await
                .unwrap()
                .iter()
                .map(|r| r.id.clone())
                .collect();

            let expected: Vec<String> = rules
                .iter()
                .filter(|r| {
                    r.trigger_type == event.event_type
                        && r.operator.apply(value, r.condition.threshold)
                })
                .map(|r| r.id.clone())
                .collect();

            assert_eq!(matched, expected, "{event_type} temperature={value}");
            for rule in &rules {
                if rule.trigger_type != event.event_type {
                    assert!(!matched.contains(&rule.id));
                }
            }
        }

        // Key absent: nothing matches
        let event = Event::new(
            "sensor-1",
            event_type,
            BTreeMap::from([("humidity".to_string(), 50.0)]),
        );
        assert!(matcher.matches(&event).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_one_consequence_per_matching_rule() {
    let hub = Hub::new();
    let a = hub.add_rule(motion_rule("a", Operator::Ge, 1.0, "turn_on_light"));
    let b = hub.add_rule(motion_rule("b", Operator::Gt, 0.0, "start_camera"));
    hub.add_rule(motion_rule("c", Operator::Lt, 1.0, "turn_off_light"));
    let d = hub.add_rule(motion_rule("d", Operator::Le, 5.0, "notify"));

    let event =
        Event::new("sensor-1", "motion_detected", BTreeMap::new()).with_measurement("motion", 1.0);
    let outcome = hub.reactor.process_event(&event).await.unwrap();
    assert_eq!(outcome.matched, 3);
    assert!(outcome.failures.is_empty());

    let records = hub.store.find_by_event(&event.id).await.unwrap();
    let rule_ids: Vec<&str> = records.iter().map(|c| c.rule_id.as_str()).collect();
    assert_eq!(rule_ids, vec![a.id.as_str(), b.id.as_str(), d.id.as_str()]);
    assert!(records.iter().all(|c| c.event_id == event.id));
}

#[tokio::test]
async fn test_executed_status_never_reverts() {
    let hub = Hub::new();
    hub.add_rule(heater_rule());
    let lifecycle = ConsequenceLifecycle::new(hub.store.clone());

    let event = Event::new("sensor-1", "temperature_change", BTreeMap::new())
        .with_measurement("temperature", 40.0);
    let outcome = hub.reactor.process_event(&event).await.unwrap();
    let id = outcome.executed[0].id.clone();

    // Reprocessing the same event and a manual execute leave it executed
    let again = hub.reactor.process_event(&event).await.unwrap();
    assert_eq!(again.already_executed, 1);
    assert!(matches!(
        lifecycle.mark_executed(&id).await,
        Err(LifecycleError::InvalidTransition(_))
    ));

    let record = lifecycle.get(&id).await.unwrap();
    assert_eq!(record.status, ConsequenceStatus::Executed);
    assert_eq!(record.executed_at, outcome.executed[0].executed_at);
    assert_eq!(hub.dispatcher.calls().len(), 1);
}

#[tokio::test]
async fn test_fifo_processing_order() {
    let hub = Hub::new();
    hub.add_rule(heater_rule());

    let mut sent = Vec::new();
    for value in [29.0, 30.0, 31.0] {
        let event = hub.send("temperature_change", &[("temperature", value)]).await;
        sent.push(event.id);
    }

    hub.reactor.start();
    hub.drained().await;

    // A malformed payload in between is dropped without disturbing order
    hub.queue.enqueue("not an event".to_string()).await.unwrap();
    let last = hub.send("temperature_change", &[("temperature", 32.0)]).await;
    sent.push(last.id);
    hub.drained().await;

    let processed: Vec<String> = hub
        .consequences()
        .await
        .into_iter()
        .map(|c| c.event_id)
        .collect();
    assert_eq!(processed, sent);

    let logged: Vec<String> = hub
        .events
        .find_all()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(logged, sent);

    hub.reactor.shutdown().await;
    assert!(!hub.reactor.is_running());
}
