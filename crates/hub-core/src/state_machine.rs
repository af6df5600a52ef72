//! Consequence status transition table
//!
//! ```text
//! Pending → Executed
//! ```
//!
//! `Executed` is terminal.

use thiserror::Error;

use crate::ConsequenceStatus;

/// Error when an invalid status transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid status transition from {from} to {to}: {reason}")]
pub struct InvalidTransition {
    pub from: ConsequenceStatus,
    pub to: ConsequenceStatus,
    pub reason: &'static str,
}

impl ConsequenceStatus {
    /// Attempt a transition to a new status.
    ///
    /// Returns the new status if valid, or an error describing why the
    /// transition is invalid.
    pub fn try_transition(
        self,
        to: ConsequenceStatus,
    ) -> Result<ConsequenceStatus, InvalidTransition> {
        use ConsequenceStatus::*;

        match (self, to) {
            (Pending, Executed) => Ok(to),
            (Executed, Executed) => Err(InvalidTransition {
                from: self,
                to,
                reason: "consequence already executed",
            }),
            (Executed, Pending) => Err(InvalidTransition {
                from: self,
                to,
                reason: "executed is terminal",
            }),
            (Pending, Pending) => Err(InvalidTransition {
                from: self,
                to,
                reason: "consequence is already pending",
            }),
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: ConsequenceStatus) -> bool {
        self.try_transition(to).is_ok()
    }
}
