//! One-shot completion handles.
//!
//! [`completion`] splits a not-yet-known outcome into a [`Resolver`], which
//! settles it later, and a [`Completion`] future, which observes it. This
//! decouples creating a task from settling it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::task::{Outcome, TaskError};

type Slot<T, E> = Arc<Mutex<Option<oneshot::Sender<Outcome<T, E>>>>>;

/// Create a linked resolver/completion pair.
pub fn completion<T, E>() -> (Resolver<T, E>, Completion<T, E>) {
    let (tx, rx) = oneshot::channel();
    (
        Resolver {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        Completion { rx },
    )
}

/// Settles a [`Completion`]. Only the first settlement counts; every later
/// call is a no-op that returns `false`.
///
/// Clones share the same slot.
pub struct Resolver<T, E> {
    slot: Slot<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T, E> Resolver<T, E> {
    /// Settle with a value.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with an operation error.
    pub fn reject(&self, error: E) -> bool {
        self.settle(Err(TaskError::Failed(error)))
    }

    /// Settle as cancelled.
    pub fn cancel(&self) -> bool {
        self.settle(Err(TaskError::Cancelled))
    }

    /// Settle with an arbitrary outcome. Returns `true` only for the call
    /// that actually settled the handle.
    ///
    /// The awaiting side is woken, never run inline.
    pub fn settle(&self, outcome: Outcome<T, E>) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                // A dropped Completion just means nobody is listening.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Future side of a completion pair.
///
/// Resolves to [`TaskError::Cancelled`] if every [`Resolver`] is dropped
/// without settling.
pub struct Completion<T, E> {
    rx: oneshot::Receiver<Outcome<T, E>>,
}

impl<T, E> Future for Completion<T, E> {
    type Output = Outcome<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Cancelled)))
    }
}

impl<T, E> fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}
