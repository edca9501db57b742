//! The pull-based pipeline engine.
//!
//! Each call to [`Pipeline::next`] makes progress until one outcome can be
//! handed back. While it waits it keeps the queue fed: a new source item
//! is fetched only while fewer than `concurrency` tasks are scheduled or
//! buffered, so an infinite source never runs ahead of the consumer.
//!
//! The first error (from the source, the transform, or a panic) is
//! delivered and ends the run. In ordered mode every result for an earlier
//! position is delivered before it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, FuturesUnordered, Stream, StreamExt};
use futures::FutureExt;
use tracing::{debug, trace, warn};

use conflux_queue::{Outcome, Priority, TaskError, TaskQueue, DEFAULT_PRIORITY};

use crate::cursor::Cursor;
use crate::queue_source::QueueSource;

type Transform<T, U, E> = Arc<dyn Fn(T, usize) -> BoxFuture<'static, Result<U, E>> + Send + Sync>;
type StopWhen<U> = Arc<dyn Fn(&U) -> bool + Send + Sync>;
type InFlight<U, E> = FuturesUnordered<BoxFuture<'static, (usize, Outcome<U, E>)>>;

/// Applies an async transform to every item of a source stream through a
/// [`TaskQueue`], yielding the results one at a time.
///
/// Dropping a pipeline before it is finished cancels every task it still
/// has pending in the queue. Tasks that already started run to completion
/// and their results are discarded.
pub struct Pipeline<T, U, E> {
    source: BoxStream<'static, Result<T, E>>,
    transform: Transform<T, U, E>,
    queue: TaskQueue,
    priority: Priority,
    stop_when: Option<StopWhen<U>>,
    cursor: Cursor<U, E>,
    in_flight: InFlight<U, E>,
}

impl<T, U, E> Pipeline<T, U, E>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
{
    /// A pipeline with the default priority and no early stop.
    pub fn new<S, F, Fut>(source: S, transform: F, queue: impl Into<QueueSource>, ordered: bool) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        F: Fn(T, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
    {
        Self::builder(source, transform)
            .queue(queue)
            .ordered(ordered)
            .build()
    }

    pub fn builder<S, F, Fut>(source: S, transform: F) -> PipelineBuilder<T, U, E>
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        F: Fn(T, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
    {
        PipelineBuilder {
            source: source.boxed(),
            transform: Arc::new(move |value: T, index: usize| transform(value, index).boxed()),
            queue: QueueSource::default(),
            ordered: true,
            priority: DEFAULT_PRIORITY,
            stop_when: None,
        }
    }

    /// Next outcome, or `None` once the run is over.
    ///
    /// After an error has been returned every further call returns `None`.
    pub async fn next(&mut self) -> Option<Outcome<U, E>> {
        loop {
            if self.cursor.is_finished() {
                return None;
            }
            if let Some(outcome) = self.cursor.pop_ready() {
                if outcome.is_err() {
                    self.halt();
                }
                return Some(outcome);
            }
            if self.cursor.is_drained() {
                self.cursor.finish();
                self.in_flight = FuturesUnordered::new();
                debug!(
                    fetched = self.cursor.fetched(),
                    delivered = self.cursor.delivered(),
                    stopped_early = self.cursor.is_stopped(),
                    "pipeline finished"
                );
                return None;
            }

            let fetch = self.wants_fetch();
            let waiting = !self.in_flight.is_empty();
            tokio::select! {
                biased;
                Some((index, outcome)) = self.in_flight.next(), if waiting => {
                    self.on_settled(index, outcome);
                }
                item = self.source.next(), if fetch => {
                    if self.on_fetched(item) && self.queue.concurrency().is_unbounded() {
                        // An always-ready source would otherwise starve the
                        // tasks it just spawned.
                        tokio::task::yield_now().await;
                    }
                }
                else => {
                    // Unreachable while every tracked index has a future in
                    // `in_flight`. Release builds end the run instead.
                    if cfg!(debug_assertions) {
                        unreachable!(
                            "pipeline stalled with nothing in flight (scheduled = {})",
                            self.cursor.scheduled()
                        );
                    }
                    warn!(
                        scheduled = self.cursor.scheduled(),
                        "pipeline stalled with nothing in flight"
                    );
                    self.halt();
                    return None;
                }
            }
        }
    }

    /// Drive the pipeline to the end, stopping at the first error.
    pub async fn collect_all(mut self) -> Result<Vec<U>, TaskError<E>> {
        let mut values = Vec::new();
        while let Some(outcome) = self.next().await {
            values.push(outcome?);
        }
        Ok(values)
    }

    pub fn into_stream(self) -> impl Stream<Item = Outcome<U, E>> + Send + 'static {
        stream::unfold(self, |mut pipeline| async move {
            let outcome = pipeline.next().await?;
            Some((outcome, pipeline))
        })
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn is_finished(&self) -> bool {
        self.cursor.is_finished()
    }

    fn wants_fetch(&self) -> bool {
        self.cursor.may_fetch()
            && self
                .queue
                .concurrency()
                .limit()
                .map_or(true, |limit| self.cursor.outstanding() < limit)
    }

    /// Returns `true` when a task was scheduled.
    fn on_fetched(&mut self, item: Option<Result<T, E>>) -> bool {
        match item {
            None => {
                trace!(fetched = self.cursor.fetched(), "source exhausted");
                self.cursor.mark_exhausted();
                false
            }
            Some(Ok(value)) => {
                let index = self.cursor.claim_index();
                self.schedule(index, value);
                true
            }
            Some(Err(error)) => {
                let index = self.cursor.claim_index();
                debug!(index, "source failed");
                self.cursor.mark_exhausted();
                self.cursor.store(index, Err(TaskError::Failed(error)));
                self.short_circuit(index);
                false
            }
        }
    }

    fn schedule(&mut self, index: usize, value: T) {
        let transform = Arc::clone(&self.transform);
        let (handle, cancel) = self
            .queue
            .submit(move || transform(value, index), self.priority);
        trace!(index, task = handle.id(), "scheduled");
        self.cursor.track(index, cancel);
        self.in_flight
            .push(handle.map(move |outcome| (index, outcome)).boxed());
    }

    fn on_settled(&mut self, index: usize, outcome: Outcome<U, E>) {
        if !self.cursor.untrack(index) {
            match &outcome {
                Err(TaskError::Failed(_)) | Err(TaskError::Panicked(_)) => {
                    debug!(index, "discarding error from abandoned task")
                }
                _ => trace!(index, "discarding outcome of abandoned task"),
            }
            return;
        }
        let stop = match &outcome {
            Ok(value) => self.stop_when.as_ref().is_some_and(|matches| matches(value)),
            Err(_) => true,
        };
        self.cursor.store(index, outcome);
        if stop {
            self.short_circuit(index);
        }
    }

    fn short_circuit(&mut self, index: usize) {
        let abandoned = self.cursor.short_circuit(index);
        debug!(index, abandoned, "pipeline stopping early");
    }

    fn halt(&mut self) {
        let abandoned = self.cursor.halt();
        self.in_flight = FuturesUnordered::new();
        if abandoned > 0 {
            debug!(abandoned, "pipeline halted");
        }
    }
}

impl<T, U, E> Drop for Pipeline<T, U, E> {
    fn drop(&mut self) {
        let abandoned = self.cursor.cancel_scheduled();
        if abandoned > 0 {
            debug!(abandoned, "pipeline dropped before finishing");
        }
    }
}

impl<T, U, E> fmt::Debug for Pipeline<T, U, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("queue", &self.queue)
            .field("priority", &self.priority)
            .field("fetched", &self.cursor.fetched())
            .field("delivered", &self.cursor.delivered())
            .field("scheduled", &self.cursor.scheduled())
            .field("finished", &self.cursor.is_finished())
            .finish()
    }
}

/// Configures a [`Pipeline`]. Obtain one from [`Pipeline::builder`].
///
/// Defaults: a private queue of concurrency 1, ordered output,
/// [`DEFAULT_PRIORITY`], no early stop.
pub struct PipelineBuilder<T, U, E> {
    source: BoxStream<'static, Result<T, E>>,
    transform: Transform<T, U, E>,
    queue: QueueSource,
    ordered: bool,
    priority: Priority,
    stop_when: Option<StopWhen<U>>,
}

impl<T, U, E> PipelineBuilder<T, U, E> {
    pub fn queue(mut self, queue: impl Into<QueueSource>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Deliver in source order (`true`) or completion order (`false`).
    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// Priority of every task this pipeline submits.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Stop fetching once a value matches. The matching value is still
    /// delivered; in ordered mode so is every value before it.
    pub fn stop_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&U) -> bool + Send + Sync + 'static,
    {
        self.stop_when = Some(Arc::new(predicate));
        self
    }

    pub fn build(self) -> Pipeline<T, U, E> {
        let queue = self.queue.into_queue();
        debug!(
            concurrency = %queue.concurrency(),
            ordered = self.ordered,
            priority = self.priority,
            "pipeline created"
        );
        Pipeline {
            source: self.source,
            transform: self.transform,
            queue,
            priority: self.priority,
            stop_when: self.stop_when,
            cursor: Cursor::new(self.ordered),
            in_flight: FuturesUnordered::new(),
        }
    }
}
