use std::num::NonZeroUsize;

use conflux_queue::{Concurrency, QueueError, TaskQueue};

/// Where a pipeline gets its [`TaskQueue`] from.
///
/// Passing an existing queue lets several pipelines compete for the same
/// slots under one priority order. The other variants create a private
/// queue for the run.
#[derive(Debug, Clone)]
pub enum QueueSource {
    Bounded(NonZeroUsize),
    Unbounded,
    Existing(TaskQueue),
}

impl QueueSource {
    /// A private queue running at most `limit` tasks. Zero is rejected.
    pub fn bounded(limit: usize) -> Result<Self, QueueError> {
        NonZeroUsize::new(limit)
            .map(QueueSource::Bounded)
            .ok_or(QueueError::InvalidConcurrency(limit))
    }

    pub fn into_queue(self) -> TaskQueue {
        match self {
            QueueSource::Bounded(limit) => TaskQueue::with_concurrency(Concurrency::Bounded(limit)),
            QueueSource::Unbounded => TaskQueue::unbounded(),
            QueueSource::Existing(queue) => queue,
        }
    }
}

impl Default for QueueSource {
    /// One task at a time.
    fn default() -> Self {
        QueueSource::Bounded(NonZeroUsize::MIN)
    }
}

impl TryFrom<usize> for QueueSource {
    type Error = QueueError;

    fn try_from(limit: usize) -> Result<Self, Self::Error> {
        QueueSource::bounded(limit)
    }
}

impl From<NonZeroUsize> for QueueSource {
    fn from(limit: NonZeroUsize) -> Self {
        QueueSource::Bounded(limit)
    }
}

impl From<Concurrency> for QueueSource {
    fn from(concurrency: Concurrency) -> Self {
        match concurrency {
            Concurrency::Bounded(limit) => QueueSource::Bounded(limit),
            Concurrency::Unbounded => QueueSource::Unbounded,
        }
    }
}

impl From<TaskQueue> for QueueSource {
    fn from(queue: TaskQueue) -> Self {
        QueueSource::Existing(queue)
    }
}

impl From<&TaskQueue> for QueueSource {
    fn from(queue: &TaskQueue) -> Self {
        QueueSource::Existing(queue.clone())
    }
}
