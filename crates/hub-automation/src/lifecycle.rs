//! Consequence lifecycle
//!
//! Creates consequence records for (event, rule) matches and moves them
//! from `pending` to `executed`. Creation is idempotent per pair so a
//! redelivered event never produces a second record.

use chrono::Utc;
use hub_core::{Consequence, ConsequenceStatus, Event, InvalidTransition, Rule};
use hub_recorder::{RecorderError, SharedConsequenceStore};
use thiserror::Error;
use tracing::{debug, info};

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("consequence not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("consequence persistence failed: {0}")]
    Persistence(#[from] RecorderError),
}

impl LifecycleError {
    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, LifecycleError::Persistence(_))
    }
}

/// Result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Creates and transitions consequence records
#[derive(Clone)]
pub struct ConsequenceLifecycle {
    store: SharedConsequenceStore,
}

impl ConsequenceLifecycle {
    pub fn new(store: SharedConsequenceStore) -> Self {
        Self { store }
    }

    /// Record that `rule` fired for `event`.
    ///
    /// Returns the existing record unchanged if this pair was already
    /// recorded, otherwise persists a new `pending` record.
    pub async fn create(&self, event: &Event, rule: &Rule) -> LifecycleResult<Consequence> {
        if let Some(existing) = self
            .store
            .find_by_event_and_rule(&event.id, &rule.id)
            .await?
        {
            debug!(
                consequence_id = %existing.id,
                status = %existing.status,
                "Consequence already recorded"
            );
            return Ok(existing);
        }

        let consequence = Consequence::pending(event, rule);
        match self.store.insert(&consequence).await {
            Ok(()) => {}
            Err(RecorderError::Conflict { .. }) => {
                // Lost a race with another writer for the same pair
                return self
                    .store
                    .find_by_event_and_rule(&event.id, &rule.id)
                    .await?
                    .ok_or_else(|| LifecycleError::NotFound(consequence.id.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            consequence_id = %consequence.id,
            event_id = %event.id,
            rule_id = %rule.id,
            action = %consequence.action,
            device_id = %consequence.device_id,
            "Consequence created"
        );
        Ok(consequence)
    }

    /// Move a consequence to `executed`.
    ///
    /// The store applies the transition only if the record is still
    /// `pending`, so of two racing callers exactly one succeeds. The other,
    /// like any later call, fails with `InvalidTransition` and leaves the
    /// record untouched.
    pub async fn mark_executed(&self, consequence_id: &str) -> LifecycleResult<Consequence> {
        let mut consequence = self
            .store
            .get(consequence_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(consequence_id.to_string()))?;

        let expected = consequence.status;
        consequence.mark_executed(Utc::now())?;

        match self.store.update(&consequence, expected).await {
            Ok(()) => {}
            Err(RecorderError::NotFound(id)) => return Err(LifecycleError::NotFound(id)),
            Err(RecorderError::StatusChanged { actual, .. }) => {
                debug!(consequence_id, status = %actual, "Consequence changed concurrently");
                let rejected = actual
                    .try_transition(ConsequenceStatus::Executed)
                    .err()
                    .unwrap_or(InvalidTransition {
                        from: actual,
                        to: ConsequenceStatus::Executed,
                        reason: "consequence changed concurrently",
                    });
                return Err(rejected.into());
            }
            Err(e) => return Err(e.into()),
        }

        info!(consequence_id = %consequence.id, "Consequence executed");
        Ok(consequence)
    }

    pub async fn get(&self, consequence_id: &str) -> LifecycleResult<Consequence> {
        self.store
            .get(consequence_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(consequence_id.to_string()))
    }

    /// All consequences in creation order
    pub async fn list(&self) -> LifecycleResult<Vec<Consequence>> {
        Ok(self.store.find_all().await?)
    }

    /// Consequences produced by one event
    pub async fn for_event(&self, event_id: &str) -> LifecycleResult<Vec<Consequence>> {
        Ok(self.store.find_by_event(event_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hub_core::{Operator, RuleCondition};
    use hub_recorder::{
        ConsequenceStore, MemoryConsequenceStore, RecorderResult, SqliteConsequenceStore,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    /// Store whose `get` waits until two readers have loaded the record
    struct LockstepStore<S> {
        inner: S,
        readers: Barrier,
    }

    #[async_trait]
    impl<S: ConsequenceStore> ConsequenceStore for LockstepStore<S> {
        async fn insert(&self, consequence: &Consequence) -> RecorderResult<()> {
            self.inner.insert(consequence).await
        }

        async fn get(&self, id: &str) -> RecorderResult<Option<Consequence>> {
            let record = self.inner.get(id).await;
            self.readers.wait().await;
            record
        }

        async fn update(
            &self,
            consequence: &Consequence,
            expected: ConsequenceStatus,
        ) -> RecorderResult<()> {
            self.inner.update(consequence, expected).await
        }

        async fn find_all(&self) -> RecorderResult<Vec<Consequence>> {
            self.inner.find_all().await
        }

        async fn find_by_event(&self, event_id: &str) -> RecorderResult<Vec<Consequence>> {
            self.inner.find_by_event(event_id).await
        }

        async fn find_by_event_and_rule(
            &self,
            event_id: &str,
            rule_id: &str,
        ) -> RecorderResult<Option<Consequence>> {
            self.inner.find_by_event_and_rule(event_id, rule_id).await
        }
    }

    fn heater_rule() -> Rule {
        Rule::new(
            "Heater",
            "temperature_change",
            RuleCondition::new("temperature", 28.0),
            Operator::Gt,
            "device_123",
            "turn_on_heater",
        )
    }

    fn warm_event() -> Event {
        Event::new(
            "sensor-1",
            "temperature_change",
            BTreeMap::from([("temperature".to_string(), 29.0)]),
        )
    }

    #[tokio::test]
    async fn test_create_then_execute() {
        let lifecycle = ConsequenceLifecycle::new(Arc::new(MemoryConsequenceStore::new()));
        let (event, rule) = (warm_event(), heater_rule());

        let created = lifecycle.create(&event, &rule).await.unwrap();
        assert_eq!(created.status, ConsequenceStatus::Pending);
        assert_eq!(created.action, "turn_on_heater");
        assert_eq!(created.device_id, "device_123");

        let executed = lifecycle.mark_executed(&created.id).await.unwrap();
        assert_eq!(executed.status, ConsequenceStatus::Executed);
        assert!(executed.executed_at.is_some());

        let stored = lifecycle.get(&created.id).await.unwrap();
        assert_eq!(stored, executed);
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_pair() {
        let store = SqliteConsequenceStore::in_memory().unwrap();
        let lifecycle = ConsequenceLifecycle::new(Arc::new(store));
        let (event, rule) = (warm_event(), heater_rule());

        let first = lifecycle.create(&event, &rule).await.unwrap();
        lifecycle.mark_executed(&first.id).await.unwrap();

        let again = lifecycle.create(&event, &rule).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.status, ConsequenceStatus::Executed);
        assert_eq!(lifecycle.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_mark_executed_rejected() {
        let lifecycle = ConsequenceLifecycle::new(Arc::new(MemoryConsequenceStore::new()));
        let created = lifecycle
            .create(&warm_event(), &heater_rule())
            .await
            .unwrap();

        let first = lifecycle.mark_executed(&created.id).await.unwrap();
        let err = lifecycle.mark_executed(&created.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));
        assert!(!err.is_retryable());

        // The first execution timestamp is kept
        let stored = lifecycle.get(&created.id).await.unwrap();
        assert_eq!(stored.executed_at, first.executed_at);
    }

    #[tokio::test]
    async fn test_unknown_consequence_not_found() {
        let lifecycle = ConsequenceLifecycle::new(Arc::new(MemoryConsequenceStore::new()));
        assert!(matches!(
            lifecycle.mark_executed("missing").await,
            Err(LifecycleError::NotFound(_))
        ));
        assert!(matches!(
            lifecycle.get("missing").await,
            Err(LifecycleError::NotFound(_))
        ));
    }

    async fn assert_racing_executions_succeed_once<S: ConsequenceStore + 'static>(inner: S) {
        let (event, rule) = (warm_event(), heater_rule());
        let created = ConsequenceLifecycle::new(Arc::new(MemoryConsequenceStore::new()))
            .create(&event, &rule)
            .await
            .unwrap();
        inner.insert(&created).await.unwrap();

        let lifecycle = ConsequenceLifecycle::new(Arc::new(LockstepStore {
            inner,
            readers: Barrier::new(2),
        }));

        // Both callers read the record while it is still pending
        let (first, second) = tokio::join!(
            lifecycle.mark_executed(&created.id),
            lifecycle.mark_executed(&created.id)
        );

        let (winner, loser) = match (first, second) {
            (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
            (first, second) => panic!("expected exactly one success: {first:?} / {second:?}"),
        };
        assert!(matches!(loser, LifecycleError::InvalidTransition(_)));

        let stored = lifecycle.store.find_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].executed_at, winner.executed_at);
    }

    #[tokio::test]
    async fn test_racing_mark_executed_memory() {
        assert_racing_executions_succeed_once(MemoryConsequenceStore::new()).await;
    }

    #[tokio::test]
    async fn test_racing_mark_executed_sqlite() {
        assert_racing_executions_succeed_once(SqliteConsequenceStore::in_memory().unwrap()).await;
    }
}
