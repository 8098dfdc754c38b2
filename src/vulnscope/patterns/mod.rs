//! Reusable inter-agent communication patterns.
//!
//! Four coordination protocols built on the [`EventBus`](crate::event::EventBus):
//!
//! - [`chain::ChainOfThoughtPattern`]: step-wise reasoning visible to an
//!   observer agent.
//! - [`debate::DebatePattern`]: a proponent and an opponent argue over
//!   rounds, optionally moderated.
//! - [`feedback::FeedbackLoopPattern`]: a creator and a reviewer iterate on
//!   content until it stops improving.
//! - [`parallel::ParallelReasoningPattern`]: independent analysts fan out
//!   and a coordinator synthesizes.
//!
//! Patterns coordinate agents by id only; they install their own event
//! handlers for the duration of one `execute` call and always remove them on
//! exit. Every wait is bounded by an explicit timeout, and timeout paths
//! return well-formed partial records rather than errors.

use std::error::Error;
use std::fmt;

pub mod chain;
pub mod debate;
pub mod feedback;
pub mod parallel;

pub use chain::ChainOfThoughtPattern;
pub use debate::DebatePattern;
pub use feedback::FeedbackLoopPattern;
pub use parallel::ParallelReasoningPattern;

/// Error raised when a pattern is invoked with unusable inputs.
#[derive(Debug)]
pub struct PatternError {
    message: String,
}

impl PatternError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pattern error: {}", self.message)
    }
}

impl Error for PatternError {}
