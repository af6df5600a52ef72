//! Event reaction pipeline
//!
//! - [`RuleMatcher`] selects the rules an event satisfies
//! - [`ConsequenceLifecycle`] records and transitions consequences
//! - [`ActionDispatcher`] performs the device side effect
//! - [`Reactor`] drives all of the above from the event queue

mod dispatch;
mod lifecycle;
mod matcher;
mod reactor;

pub use dispatch::{ActionDispatcher, LoggingDispatcher, SharedDispatcher};
pub use lifecycle::{ConsequenceLifecycle, LifecycleError, LifecycleResult};
pub use matcher::{EvaluationError, MatchError, RuleMatcher};
pub use reactor::{
    ProcessOutcome, Reactor, ReactorContext, ReactorSettings, ReactorState, RuleFailure,
};
