//! Rule Registry
//!
//! Tracks all administratively created rules, in creation order.
//!
//! Writes that go through [`RuleRegistry::create_and_save`] and
//! [`RuleRegistry::remove_and_save`] are serialized with every `save`, so
//! the stored file always matches a state the registry actually held.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hub_core::{EventType, NewRule, Rule, RuleError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::storage::{Storable, Storage, StorageError, StorageResult};
use crate::RuleStore;

/// Storage key for the rule registry
pub const STORAGE_KEY: &str = "hub.rules";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Errors from administrative rule operations
#[derive(Debug, Error)]
pub enum RuleRegistryError {
    #[error("invalid rule: {0}")]
    Invalid(#[from] RuleError),

    #[error("the name {0} is already in use")]
    DuplicateName(String),

    #[error("failed to persist rules: {0}")]
    Storage(#[from] StorageError),
}

/// Rule registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleRegistryData {
    pub rules: Vec<Rule>,
}

impl Storable for RuleRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Rule Registry
///
/// Entries are stored as `Arc<Rule>` to avoid cloning on reads.
pub struct RuleRegistry {
    storage: Arc<Storage>,

    /// Primary index: rule_id -> Rule, in insertion order
    by_id: RwLock<IndexMap<String, Arc<Rule>>>,

    /// Index: name -> rule_id
    by_name: DashMap<String, String>,

    /// Held across snapshot-and-write
    write_lock: Mutex<()>,
}

impl RuleRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_id: RwLock::new(IndexMap::new()),
            by_name: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Load from storage, appending to any rules already registered
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load::<RuleRegistryData>().await? {
            info!("Loading {} rules from storage", data.rules.len());
            for rule in data.rules {
                if let Err(e) = self.insert(rule) {
                    warn!(error = %e, "Skipping stored rule");
                }
            }
        }
        Ok(())
    }

    /// Save to storage
    pub async fn save(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.persist().await
    }

    /// Snapshot and write; the caller holds `write_lock`
    async fn persist(&self) -> StorageResult<()> {
        let data = RuleRegistryData {
            rules: self.all().iter().map(|r| (**r).clone()).collect(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} rules to storage", data.rules.len());
        Ok(())
    }

    /// Create a rule and write it through to storage.
    ///
    /// If the write fails the rule is removed again before the lock is
    /// released, so no later save can persist it.
    pub async fn create_and_save(
        &self,
        new_rule: NewRule,
    ) -> Result<Arc<Rule>, RuleRegistryError> {
        let _guard = self.write_lock.lock().await;
        let rule = self.create(new_rule)?;

        if let Err(e) = self.persist().await {
            error!(rule_id = %rule.id, error = %e, "Failed to persist rules");
            self.remove(&rule.id);
            return Err(e.into());
        }
        Ok(rule)
    }

    /// Remove a rule and write the removal through to storage.
    ///
    /// Returns `Ok(None)` for an unknown id. If the write fails the rule is
    /// restored before the lock is released.
    pub async fn remove_and_save(
        &self,
        rule_id: &str,
    ) -> Result<Option<Arc<Rule>>, RuleRegistryError> {
        let _guard = self.write_lock.lock().await;
        let Some(removed) = self.remove(rule_id) else {
            return Ok(None);
        };

        if let Err(e) = self.persist().await {
            error!(rule_id, error = %e, "Failed to persist rules");
            if let Err(restore) = self.insert((*removed).clone()) {
                error!(rule_id, error = %restore, "Failed to restore rule");
            }
            return Err(e.into());
        }
        Ok(Some(removed))
    }

    /// Validate and register a new rule
    pub fn create(&self, new_rule: NewRule) -> Result<Arc<Rule>, RuleRegistryError> {
        let rule = new_rule.into_rule()?;
        let rule = self.insert(rule)?;
        info!(rule_id = %rule.id, name = %rule.name, "Created rule");
        Ok(rule)
    }

    /// Register an existing rule, keeping its id and timestamps
    pub fn insert(&self, rule: Rule) -> Result<Arc<Rule>, RuleRegistryError> {
        match self.by_name.entry(rule.name.clone()) {
            Entry::Occupied(_) => Err(RuleRegistryError::DuplicateName(rule.name)),
            Entry::Vacant(slot) => {
                slot.insert(rule.id.clone());
                let rule = Arc::new(rule);
                self.by_id
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(rule.id.clone(), Arc::clone(&rule));
                Ok(rule)
            }
        }
    }

    /// Remove a rule
    pub fn remove(&self, rule_id: &str) -> Option<Arc<Rule>> {
        let removed = self
            .by_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(rule_id)?;
        self.by_name.remove(&removed.name);
        info!(rule_id, "Removed rule");
        Some(removed)
    }

    /// Get rule by ID
    pub fn get(&self, rule_id: &str) -> Option<Arc<Rule>> {
        self.by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(rule_id)
            .cloned()
    }

    /// Get rule by name
    pub fn get_by_name(&self, name: &str) -> Option<Arc<Rule>> {
        let rule_id = self.by_name.get(name)?.value().clone();
        self.get(&rule_id)
    }

    /// All rules in insertion order
    pub fn all(&self) -> Vec<Arc<Rule>> {
        self.by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RuleStore for RuleRegistry {
    async fn find_all(&self) -> StorageResult<Vec<Arc<Rule>>> {
        Ok(self.all())
    }

    async fn find_by_trigger_type(
        &self,
        trigger_type: &EventType,
    ) -> StorageResult<Vec<Arc<Rule>>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|rule| &rule.trigger_type == trigger_type)
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> StorageResult<Option<Arc<Rule>>> {
        Ok(self.get(id))
    }
}
