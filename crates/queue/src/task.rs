use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

use crate::completion::Resolver;

/// Task priority. Higher value = runs earlier.
pub type Priority = i64;

/// Priority used when the caller doesn't pick one.
pub const DEFAULT_PRIORITY: Priority = 0;

/// Monotonic submission counter, unique per queue.
pub type TaskId = u64;

/// Terminal failure of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError<E> {
    /// Cancelled while still pending; the work never ran.
    #[error("task cancelled before it started")]
    Cancelled,
    /// The work itself returned an error.
    #[error("task failed: {0}")]
    Failed(E),
    /// The work panicked. The payload message is kept when it is a string.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl<E> TaskError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    /// The operation error, if this is one.
    pub fn into_failed(self) -> Option<E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn map_err<F, E2>(self, f: F) -> TaskError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            TaskError::Cancelled => TaskError::Cancelled,
            TaskError::Failed(e) => TaskError::Failed(f(e)),
            TaskError::Panicked(msg) => TaskError::Panicked(msg),
        }
    }
}

/// Closed result of a task: `Ok(value) | Cancelled | Failed(e) | Panicked`.
pub type Outcome<T, E> = Result<T, TaskError<E>>;

/// Lifecycle of a task while the queue owns it.
///
/// Transitions are `Pending → Running` (then removal on settlement) or
/// `Pending → Cancelled`. A running task is never cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Cancelled,
}

/// How a started task ended, for bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SettleKind {
    Completed,
    Failed,
    Panicked,
}

/// A finished task whose outcome has not been handed to its awaiter yet.
///
/// The queue updates its counters first and only then delivers, so an
/// awaiter woken by the outcome always observes the slot as released.
pub(crate) struct Settlement {
    pub(crate) kind: SettleKind,
    deliver: Box<dyn FnOnce() + Send>,
}

impl Settlement {
    pub(crate) fn deliver(self) {
        (self.deliver)()
    }
}

/// Type-erased unit of work held in the queue's ordered list.
pub(crate) trait Job: Send {
    /// Run the work to completion. The returned future is what gets spawned.
    fn start(self: Box<Self>) -> BoxFuture<'static, Settlement>;

    /// Settle the task as cancelled without running it.
    fn cancel(self: Box<Self>);
}

pub(crate) struct TypedJob<F, T, E> {
    work: F,
    resolver: Resolver<T, E>,
}

impl<F, T, E> TypedJob<F, T, E> {
    pub(crate) fn new(work: F, resolver: Resolver<T, E>) -> Self {
        Self { work, resolver }
    }
}

impl<F, Fut, T, E> Job for TypedJob<F, T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn start(self: Box<Self>) -> BoxFuture<'static, Settlement> {
        let TypedJob { work, resolver } = *self;
        Box::pin(async move {
            // The closure is invoked inside the guarded future so a panic
            // while building the work future is caught too.
            let guarded = AssertUnwindSafe(async move { work().await }).catch_unwind();
            let outcome = match guarded.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
            };
            let kind = match &outcome {
                Ok(_) => SettleKind::Completed,
                Err(TaskError::Panicked(_)) => SettleKind::Panicked,
                Err(_) => SettleKind::Failed,
            };
            Settlement {
                kind,
                deliver: Box::new(move || {
                    resolver.settle(outcome);
                }),
            }
        })
    }

    fn cancel(self: Box<Self>) {
        self.resolver.cancel();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
