//! Collection-style operations built on [`Pipeline`].
//!
//! Every operation takes a source stream, a queue (or a concurrency to
//! build one from) and an async callback receiving `(value, index)`. The
//! first error stops the run and is returned.

use std::future::Future;

use futures::stream::{Stream, StreamExt};

use conflux_queue::TaskError;

use crate::engine::Pipeline;
use crate::queue_source::QueueSource;

/// Apply `f` to every item, keeping source order.
pub async fn map<T, U, E, S, F, Fut>(source: S, queue: impl Into<QueueSource>, f: F) -> Result<Vec<U>, TaskError<E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    F: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<U, E>> + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
{
    Pipeline::new(source, f, queue, true).collect_all().await
}

/// Apply `f` to every item, collecting results in completion order.
pub async fn map_unordered<T, U, E, S, F, Fut>(
    source: S,
    queue: impl Into<QueueSource>,
    f: F,
) -> Result<Vec<U>, TaskError<E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    F: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<U, E>> + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
{
    Pipeline::new(source, f, queue, false).collect_all().await
}

/// Keep the items for which `predicate` resolves to `true`, in source order.
pub async fn filter<T, E, S, P, Fut>(source: S, queue: impl Into<QueueSource>, predicate: P) -> Result<Vec<T>, TaskError<E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    P: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    T: Clone + Send + 'static,
    E: Send + 'static,
{
    let keep = move |value: T, index: usize| {
        let verdict = predicate(value.clone(), index);
        async move { Ok::<_, E>(verdict.await?.then_some(value)) }
    };
    let kept = Pipeline::new(source, keep, queue, true).collect_all().await?;
    Ok(kept.into_iter().flatten().collect())
}

/// Run `f` on every item for its side effects.
pub async fn for_each<T, E, S, F, Fut>(source: S, queue: impl Into<QueueSource>, f: F) -> Result<(), TaskError<E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    F: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let mut pipeline = Pipeline::new(source, f, queue, false);
    while let Some(outcome) = pipeline.next().await {
        outcome?;
    }
    Ok(())
}

/// First item in source order for which `predicate` holds.
///
/// Items after the match are never fetched; items before it still run so
/// an earlier match wins over a faster later one.
pub async fn find<T, E, S, P, Fut>(source: S, queue: impl Into<QueueSource>, predicate: P) -> Result<Option<T>, TaskError<E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    P: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    T: Clone + Send + 'static,
    E: Send + 'static,
{
    first_match(source, queue, predicate, true).await
}

/// Whichever matching item completes first.
pub async fn find_any<T, E, S, P, Fut>(
    source: S,
    queue: impl Into<QueueSource>,
    predicate: P,
) -> Result<Option<T>, TaskError<E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    P: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    T: Clone + Send + 'static,
    E: Send + 'static,
{
    first_match(source, queue, predicate, false).await
}

/// Position of the first item in source order for which `predicate` holds.
pub async fn find_index<T, E, S, P, Fut>(
    source: S,
    queue: impl Into<QueueSource>,
    predicate: P,
) -> Result<Option<usize>, TaskError<E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    P: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let check = move |value: T, index: usize| {
        let verdict = predicate(value, index);
        async move { Ok::<_, E>(verdict.await?.then_some(index)) }
    };
    let mut pipeline = Pipeline::builder(source, check)
        .queue(queue)
        .ordered(true)
        .stop_when(Option::is_some)
        .build();
    while let Some(outcome) = pipeline.next().await {
        if let Some(index) = outcome? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// `true` as soon as any item satisfies `predicate`.
pub async fn some<T, E, S, P, Fut>(source: S, queue: impl Into<QueueSource>, predicate: P) -> Result<bool, TaskError<E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    P: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let mut pipeline = Pipeline::builder(source, predicate)
        .queue(queue)
        .ordered(false)
        .stop_when(|matched: &bool| *matched)
        .build();
    while let Some(outcome) = pipeline.next().await {
        if outcome? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `false` as soon as any item fails `predicate`.
pub async fn every<T, E, S, P, Fut>(source: S, queue: impl Into<QueueSource>, predicate: P) -> Result<bool, TaskError<E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    P: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let mut pipeline = Pipeline::builder(source, predicate)
        .queue(queue)
        .ordered(false)
        .stop_when(|held: &bool| !*held)
        .build();
    while let Some(outcome) = pipeline.next().await {
        if !outcome? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Sequential left fold. Each step sees the accumulator of the previous one,
/// so no queue is involved.
pub async fn reduce<T, A, E, S, F, Fut>(source: S, initial: A, mut f: F) -> Result<A, E>
where
    S: Stream<Item = Result<T, E>>,
    F: FnMut(A, T, usize) -> Fut,
    Fut: Future<Output = Result<A, E>>,
{
    futures::pin_mut!(source);
    let mut acc = initial;
    let mut index = 0;
    while let Some(item) = source.next().await {
        acc = f(acc, item?, index).await?;
        index += 1;
    }
    Ok(acc)
}

async fn first_match<T, E, S, P, Fut>(
    source: S,
    queue: impl Into<QueueSource>,
    predicate: P,
    ordered: bool,
) -> Result<Option<T>, TaskError<E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    P: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    T: Clone + Send + 'static,
    E: Send + 'static,
{
    let check = move |value: T, index: usize| {
        let verdict = predicate(value.clone(), index);
        async move { Ok::<_, E>(verdict.await?.then_some(value)) }
    };
    let mut pipeline = Pipeline::builder(source, check)
        .queue(queue)
        .ordered(ordered)
        .stop_when(Option::is_some)
        .build();
    while let Some(outcome) = pipeline.next().await {
        if let Some(value) = outcome? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}
