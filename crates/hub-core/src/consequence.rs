//! Consequence records
//!
//! A consequence records that a rule fired for a specific event. Its
//! status only moves forward: `pending` → `executed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Event, InvalidTransition, Rule};

/// Lifecycle status of a consequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsequenceStatus {
    /// Created, action not yet confirmed
    #[default]
    Pending,
    /// Action performed
    Executed,
}

impl ConsequenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsequenceStatus::Pending => "pending",
            ConsequenceStatus::Executed => "executed",
        }
    }

    /// Parse the persisted representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ConsequenceStatus::Pending),
            "executed" => Some(ConsequenceStatus::Executed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConsequenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record of a rule firing for an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consequence {
    /// Unique identifier (ULID)
    pub id: String,

    /// Triggering event
    pub event_id: String,

    /// Triggering rule
    pub rule_id: String,

    /// Action tag copied from the rule
    pub action: String,

    /// Target device copied from the rule
    pub device_id: String,

    /// Lifecycle status
    #[serde(default)]
    pub status: ConsequenceStatus,

    /// Creation timestamp
    pub timestamp: DateTime<Utc>,

    /// Set once the consequence is executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl Consequence {
    /// Build a pending consequence for an (event, rule) match
    pub fn pending(event: &Event, rule: &Rule) -> Self {
        Self {
            id: crate::new_id(),
            event_id: event.id.clone(),
            rule_id: rule.id.clone(),
            action: rule.action.clone(),
            device_id: rule.target_device_id.clone(),
            status: ConsequenceStatus::Pending,
            timestamp: Utc::now(),
            executed_at: None,
        }
    }

    /// Move to `executed`, stamping the execution time.
    ///
    /// Fails without modifying the record if already executed.
    pub fn mark_executed(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.status = self.status.try_transition(ConsequenceStatus::Executed)?;
        self.executed_at = Some(now);
        Ok(())
    }

    pub fn is_executed(&self) -> bool {
        self.status == ConsequenceStatus::Executed
    }
}
