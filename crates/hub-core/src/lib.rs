//! Core types for the home hub
//!
//! This crate provides the fundamental types shared by the event-reaction
//! pipeline: Event, Rule, Consequence and the comparison Operator.

mod consequence;
mod event;
mod rule;
mod state_machine;

pub use consequence::{Consequence, ConsequenceStatus};
pub use event::{Event, EventType, NewEvent};
pub use rule::{NewRule, Operator, Rule, RuleCondition, RuleError, UnknownOperator};
pub use state_machine::InvalidTransition;

/// Generate a fresh identifier (ULID string)
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

