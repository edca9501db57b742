//! Pull-based pipeline engine on top of [`conflux_queue::TaskQueue`].
//!
//! A [`Pipeline`] pulls items from a source stream, schedules a transform
//! for each on a bounded priority queue, and hands results back one at a
//! time, either in source order or in completion order. The first error
//! stops the run and cancels whatever has not started yet.
//!
//! The thin operations in [`ops`] (map, filter, find, some, every, ...)
//! are direct compositions of the engine.

mod buffer;
mod cursor;
pub mod engine;
pub mod ops;
pub mod queue_source;
pub mod source;
pub mod timeout;

pub use conflux_queue::{Concurrency, Outcome, Priority, QueueError, TaskError, TaskQueue};
pub use engine::{Pipeline, PipelineBuilder};
pub use queue_source::QueueSource;
pub use timeout::{with_timeout, TimeoutError};
