//! Helpers for turning plain collections into pipeline sources.
//!
//! A pipeline pulls from any `Stream<Item = Result<T, E>>`; these cover the
//! common case of an in-memory iterator.

use futures::stream::{self, Stream};

/// Every item of `items`, none of them failing.
pub fn iter<I, E>(items: I) -> impl Stream<Item = Result<I::Item, E>> + Send + 'static
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
    E: Send + 'static,
{
    stream::iter(items.into_iter().map(Ok))
}

/// Items that may already be errors. An `Err` stops the pipeline at that
/// position.
pub fn try_iter<I, T, E>(items: I) -> impl Stream<Item = Result<T, E>> + Send + 'static
where
    I: IntoIterator<Item = Result<T, E>>,
    I::IntoIter: Send + 'static,
{
    stream::iter(items)
}
