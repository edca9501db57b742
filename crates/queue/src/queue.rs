//! The priority task queue.
//!
//! Tasks sit in one list ordered by priority (descending) and submission
//! order (ascending). Promotion to running happens in a dispatch step that
//! is always spawned as a separate continuation, never run inline from
//! [`TaskQueue::submit`]. Whoever just received a [`CancelHandle`] therefore
//! gets the rest of the current turn to cancel before the task can start.

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tracing::{debug, trace};

use crate::completion::{completion, Completion};
use crate::error::QueueError;
use crate::stats::QueueStats;
use crate::task::{Job, Outcome, Priority, TaskId, TaskState, TypedJob, DEFAULT_PRIORITY};

/// How many tasks may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Bounded(NonZeroUsize),
    Unbounded,
}

impl Concurrency {
    /// A bounded limit. Zero is rejected.
    pub fn bounded(limit: usize) -> Result<Self, QueueError> {
        NonZeroUsize::new(limit)
            .map(Concurrency::Bounded)
            .ok_or(QueueError::InvalidConcurrency(limit))
    }

    /// `None` for unbounded.
    pub fn limit(&self) -> Option<usize> {
        match self {
            Concurrency::Bounded(n) => Some(n.get()),
            Concurrency::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Concurrency::Unbounded)
    }

    /// Whether one more task may start when `running` are already going.
    pub fn allows(&self, running: usize) -> bool {
        match self {
            Concurrency::Bounded(n) => running < n.get(),
            Concurrency::Unbounded => true,
        }
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concurrency::Bounded(n) => write!(f, "{n}"),
            Concurrency::Unbounded => write!(f, "unbounded"),
        }
    }
}

struct Entry {
    id: TaskId,
    priority: Priority,
    state: TaskState,
    /// Taken when the task starts.
    job: Option<Box<dyn Job>>,
    /// Shared with the task's [`CancelHandle`]; set by whichever path
    /// cancels the entry.
    cancelled: Arc<AtomicBool>,
}

impl Entry {
    fn new(id: TaskId, priority: Priority, state: TaskState, job: Option<Box<dyn Job>>) -> Self {
        Self {
            id,
            priority,
            state,
            job,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn mark_cancelled(&mut self) -> Option<Box<dyn Job>> {
        self.state = TaskState::Cancelled;
        self.cancelled.store(true, Ordering::Release);
        self.job.take()
    }
}

#[derive(Default)]
struct QueueState {
    /// Pending and running tasks, priority descending then id ascending.
    entries: Vec<Entry>,
    running: usize,
    next_id: TaskId,
    dispatch_scheduled: bool,
    stats: QueueStats,
}

impl QueueState {
    fn pending(&self) -> usize {
        self.entries.len() - self.running
    }

    /// Insert after the last entry whose priority is >= the new one.
    fn insert_by_priority(&mut self, entry: Entry) {
        let at = self
            .entries
            .iter()
            .rposition(|e| e.priority >= entry.priority)
            .map_or(0, |i| i + 1);
        self.entries.insert(at, entry);
    }

    /// Returns `true` when the caller must spawn a dispatch continuation.
    fn request_dispatch(&mut self) -> bool {
        if self.dispatch_scheduled || self.pending() == 0 {
            return false;
        }
        self.dispatch_scheduled = true;
        true
    }

    fn take_pending(&mut self, id: TaskId) -> Option<Box<dyn Job>> {
        let at = self
            .entries
            .iter()
            .position(|e| e.id == id && e.state == TaskState::Pending)?;
        let mut entry = self.entries.remove(at);
        self.stats.record_cancelled(1);
        entry.mark_cancelled()
    }

    fn snapshot(&self) -> QueueStats {
        QueueStats {
            running: self.running,
            pending: self.pending(),
            ..self.stats.clone()
        }
    }
}

struct Shared {
    concurrency: Concurrency,
    state: Mutex<QueueState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A bounded-concurrency queue that runs submitted work on the Tokio runtime.
///
/// `TaskQueue` is a cheap handle; clones share the same queue, so several
/// producers (for example several pipelines) compete for the same slots
/// under the same priority rule.
///
/// Submitting spawns Tokio tasks and must happen inside a runtime. Drive the
/// queue from a current-thread runtime (or a [`tokio::task::LocalSet`] on
/// one): only there does a task submitted in the current turn always get
/// cancelled before it starts. On a multi-thread runtime another worker may
/// promote the task first, in which case [`CancelHandle::cancel`] returns
/// `false` and the work runs to completion as usual.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl TaskQueue {
    /// Create a queue running at most `concurrency` tasks at once.
    pub fn new(concurrency: usize) -> Result<Self, QueueError> {
        Ok(Self::with_concurrency(Concurrency::bounded(concurrency)?))
    }

    /// Create a queue that starts every task immediately.
    pub fn unbounded() -> Self {
        Self::with_concurrency(Concurrency::Unbounded)
    }

    pub fn with_concurrency(concurrency: Concurrency) -> Self {
        Self {
            shared: Arc::new(Shared {
                concurrency,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Submit `work` with the given priority.
    ///
    /// Returns the task's result handle and the function that cancels it
    /// while it is still pending. `work` is invoked only once the task is
    /// granted a slot.
    pub fn submit<F, Fut, T, E>(&self, work: F, priority: Priority) -> (TaskHandle<T, E>, CancelHandle)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (resolver, completion) = completion();
        let job: Box<dyn Job> = Box::new(TypedJob::new(work, resolver));

        let mut state = self.shared.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.stats.submitted += 1;

        let cancelled;
        if self.shared.concurrency.is_unbounded() {
            // Nothing ever waits in an unbounded queue, so the task is
            // promoted on the spot. Its body still runs on a later tick.
            let entry = Entry::new(id, priority, TaskState::Running, None);
            cancelled = Arc::clone(&entry.cancelled);
            state.entries.push(entry);
            state.running += 1;
            let running = state.running;
            state.stats.record_start(running);
            drop(state);
            trace!(task = id, priority, "task started (unbounded)");
            launch(&self.shared, id, job);
        } else {
            let entry = Entry::new(id, priority, TaskState::Pending, Some(job));
            cancelled = Arc::clone(&entry.cancelled);
            state.insert_by_priority(entry);
            let spawn = state.request_dispatch();
            drop(state);
            trace!(task = id, priority, "task queued");
            if spawn {
                spawn_dispatch(&self.shared);
            }
        }

        (
            TaskHandle { id, completion },
            CancelHandle {
                id,
                shared: Arc::clone(&self.shared),
                cancelled,
            },
        )
    }

    /// Submit with [`DEFAULT_PRIORITY`].
    pub fn submit_default<F, Fut, T, E>(&self, work: F) -> (TaskHandle<T, E>, CancelHandle)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit(work, DEFAULT_PRIORITY)
    }

    /// Cancel every task that has not started yet. Running tasks are left
    /// alone. Returns how many were cancelled.
    pub fn cancel_all_pending(&self) -> usize {
        let jobs: Vec<Box<dyn Job>> = {
            let mut state = self.shared.lock();
            let mut jobs = Vec::new();
            state.entries.retain_mut(|entry| {
                if entry.state != TaskState::Pending {
                    return true;
                }
                jobs.extend(entry.mark_cancelled());
                false
            });
            state.stats.record_cancelled(jobs.len());
            jobs
        };
        let count = jobs.len();
        for job in jobs {
            job.cancel();
        }
        if count > 0 {
            debug!(count, "cancelled all pending tasks");
        }
        count
    }

    pub fn running(&self) -> usize {
        self.shared.lock().running
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().pending()
    }

    /// Pending plus running.
    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn concurrency(&self) -> Concurrency {
        self.shared.concurrency
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.lock().snapshot()
    }

    /// Whether two handles point at the same queue.
    pub fn same_queue(&self, other: &TaskQueue) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("TaskQueue")
            .field("concurrency", &self.shared.concurrency)
            .field("running", &state.running)
            .field("pending", &state.pending())
            .finish()
    }
}

fn spawn_dispatch(shared: &Arc<Shared>) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move { dispatch(&shared) });
}

/// Promote pending tasks while slots are free.
///
/// The earliest pending entry is always the best candidate thanks to the
/// insertion order, so this is a front-to-back scan.
fn dispatch(shared: &Arc<Shared>) {
    let launches = {
        let mut state = shared.lock();
        state.dispatch_scheduled = false;
        let mut launches = Vec::new();
        while shared.concurrency.allows(state.running) {
            let Some(at) = state
                .entries
                .iter()
                .position(|e| e.state == TaskState::Pending)
            else {
                break;
            };
            let entry = &mut state.entries[at];
            entry.state = TaskState::Running;
            let (id, job) = (entry.id, entry.job.take());
            state.running += 1;
            let running = state.running;
            state.stats.record_start(running);
            debug_assert!(
                shared.concurrency.limit().map_or(true, |n| running <= n),
                "running {running} exceeds concurrency {}",
                shared.concurrency
            );
            if let Some(job) = job {
                launches.push((id, job));
            }
        }
        launches
    };
    for (id, job) in launches {
        trace!(task = id, "task started");
        launch(shared, id, job);
    }
}

fn launch(shared: &Arc<Shared>, id: TaskId, job: Box<dyn Job>) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let settlement = job.start().await;
        let spawn = {
            let mut state = shared.lock();
            if let Some(at) = state.entries.iter().position(|e| e.id == id) {
                state.entries.remove(at);
            }
            debug_assert!(state.running > 0, "settled a task with nothing running");
            state.running = state.running.saturating_sub(1);
            state.stats.record_settle(settlement.kind);
            state.request_dispatch()
        };
        trace!(task = id, kind = ?settlement.kind, "task settled");
        settlement.deliver();
        if spawn {
            spawn_dispatch(&shared);
        }
    });
}

/// Result handle of a submitted task. Await it for the [`Outcome`].
///
/// Dropping the handle does not cancel the task.
pub struct TaskHandle<T, E> {
    id: TaskId,
    completion: Completion<T, E>,
}

impl<T, E> TaskHandle<T, E> {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Outcome<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion).poll(cx)
    }
}

impl<T, E> fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

/// Cancels one task while it is still pending.
pub struct CancelHandle {
    id: TaskId,
    shared: Arc<Shared>,
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Cancel the task if it has not started. Returns `true` exactly once,
    /// for the call that removed it; `false` if it is running, settled, or
    /// already cancelled.
    pub fn cancel(&self) -> bool {
        let job = self.shared.lock().take_pending(self.id);
        match job {
            Some(job) => {
                job.cancel();
                debug!(task = self.id, "task cancelled");
                true
            }
            None => false,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Current state, or `None` once the task has settled. A task cancelled
    /// through this handle or [`TaskQueue::cancel_all_pending`] stays
    /// [`TaskState::Cancelled`].
    pub fn state(&self) -> Option<TaskState> {
        if self.cancelled.load(Ordering::Acquire) {
            return Some(TaskState::Cancelled);
        }
        self.shared
            .lock()
            .entries
            .iter()
            .find(|e| e.id == self.id)
            .map(|e| e.state)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
