//! Bounded-concurrency execution of independent async tasks.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::future::Future;

/// Run `tasks` with at most `limit` in flight, returning results in input
/// order regardless of completion order.
///
/// A limit of 0 is treated as 1.
pub async fn bounded_all<I, F, T>(tasks: I, limit: usize) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T>,
{
    stream::iter(tasks).buffered(limit.max(1)).collect().await
}

/// [`bounded_all`] for fallible tasks: the batch runs to completion, then
/// the first error (in input order) propagates.
///
/// A failed task rejects the whole batch. Callers wanting skip-and-continue
/// semantics return `Ok(None)` from the task and filter the results.
pub async fn try_bounded_all<I, F, T>(tasks: I, limit: usize) -> Result<Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T>>,
{
    bounded_all(tasks, limit).await.into_iter().collect()
}
