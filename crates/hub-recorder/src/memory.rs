//! In-memory consequence store

use async_trait::async_trait;
use hub_core::{Consequence, ConsequenceStatus};
use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::{ConsequenceStore, RecorderError, RecorderResult};

/// Consequence store kept in process memory, in creation order
#[derive(Default)]
pub struct MemoryConsequenceStore {
    records: RwLock<IndexMap<String, Consequence>>,
}

impl MemoryConsequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ConsequenceStore for MemoryConsequenceStore {
    async fn insert(&self, consequence: &Consequence) -> RecorderResult<()> {
        let mut records = self.records.write().await;

        let duplicate = records
            .values()
            .any(|c| c.event_id == consequence.event_id && c.rule_id == consequence.rule_id);
        if duplicate {
            return Err(RecorderError::Conflict {
                event_id: consequence.event_id.clone(),
                rule_id: consequence.rule_id.clone(),
            });
        }

        records.insert(consequence.id.clone(), consequence.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> RecorderResult<Option<Consequence>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn update(
        &self,
        consequence: &Consequence,
        expected: ConsequenceStatus,
    ) -> RecorderResult<()> {
        let mut records = self.records.write().await;
        let existing = records
            .get_mut(&consequence.id)
            .ok_or_else(|| RecorderError::NotFound(consequence.id.clone()))?;

        if existing.status != expected {
            return Err(RecorderError::StatusChanged {
                id: consequence.id.clone(),
                expected,
                actual: existing.status,
            });
        }

        *existing = consequence.clone();
        Ok(())
    }

    async fn find_all(&self) -> RecorderResult<Vec<Consequence>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn find_by_event(&self, event_id: &str) -> RecorderResult<Vec<Consequence>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|c| c.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn find_by_event_and_rule(
        &self,
        event_id: &str,
        rule_id: &str,
    ) -> RecorderResult<Option<Consequence>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|c| c.event_id == event_id && c.rule_id == rule_id)
            .cloned())
    }
}
