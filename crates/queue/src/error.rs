//! Queue error types.

use thiserror::Error;

/// Errors raised synchronously when a queue is constructed.
///
/// Submitting, running and cancelling never fail at the queue level; a
/// failing task only fails its own handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("invalid concurrency {0}: expected a positive limit or unbounded")]
    InvalidConcurrency(usize),
}
