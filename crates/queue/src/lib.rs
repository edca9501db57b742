//! Bounded-concurrency priority task queue.
//!
//! [`TaskQueue`] admits up to `concurrency` tasks at a time and holds the
//! rest ordered by priority (highest first, FIFO among equals). Tasks that
//! have not started yet can be cancelled through their [`CancelHandle`].

pub mod completion;
pub mod error;
pub mod queue;
pub mod stats;
pub mod task;

pub use completion::{completion, Completion, Resolver};
pub use error::QueueError;
pub use queue::{CancelHandle, Concurrency, TaskHandle, TaskQueue};
pub use stats::QueueStats;
pub use task::{Outcome, Priority, TaskError, TaskId, TaskState, DEFAULT_PRIORITY};
