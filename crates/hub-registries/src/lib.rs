//! Rule persistence
//!
//! Rules are kept in an insertion-ordered registry and persisted as a
//! versioned JSON file in the `.storage/` directory. The event pipeline
//! reads them through the [`RuleStore`] trait.

pub mod rule_registry;
pub mod storage;

pub use rule_registry::{RuleRegistry, RuleRegistryData, RuleRegistryError};
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};

use async_trait::async_trait;
use hub_core::{EventType, Rule};
use std::sync::Arc;

/// Read access to persisted rules
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules in insertion order
    async fn find_all(&self) -> StorageResult<Vec<Arc<Rule>>>;

    /// Rules whose trigger type equals `trigger_type`, in insertion order
    async fn find_by_trigger_type(&self, trigger_type: &EventType)
        -> StorageResult<Vec<Arc<Rule>>>;

    /// A single rule by id
    async fn find_by_id(&self, id: &str) -> StorageResult<Option<Arc<Rule>>>;
}

/// Shared handle to a rule store
pub type SharedRuleStore = Arc<dyn RuleStore>;
