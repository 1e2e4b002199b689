use std::future::Future;

use futures_util::stream::{FuturesUnordered, StreamExt};

use crate::error::{AggregatedFailure, FleetError};

/// Runs `work` once per item, concurrently, and joins all of them.
///
/// A failing worker never cancels its siblings; every failure is collected
/// and surfaced together once the last worker finishes. Successful results and
/// failures are both recorded in completion order. No items is a no-op and a
/// single item is awaited directly.
///
/// Items are moved into their worker, so a worker can own a disjoint `&mut`
/// borrow of a cluster or agent. Shared state touched by `work` must be
/// synchronized by the caller.
///
/// # Errors
///
/// Returns an `AggregatedFailure` holding one entry per failed worker.
pub async fn run_all<I, F, Fut, R>(items: I, mut work: F) -> Result<Vec<R>, AggregatedFailure>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<R, FleetError>>,
{
    let mut items = items.into_iter().peekable();
    let Some(first) = items.next() else {
        return Ok(Vec::new());
    };

    if items.peek().is_none() {
        return match work(first).await {
            Ok(value) => Ok(vec![value]),
            Err(err) => Err(AggregatedFailure::new(vec![err])),
        };
    }

    let mut workers: FuturesUnordered<Fut> = FuturesUnordered::new();
    workers.push(work(first));
    for item in items {
        workers.push(work(item));
    }

    let mut results = Vec::with_capacity(workers.len());
    let mut failures = AggregatedFailure::default();
    while let Some(outcome) = workers.next().await {
        match outcome {
            Ok(value) => results.push(value),
            Err(err) => failures.push(err),
        }
    }

    if failures.is_empty() {
        Ok(results)
    } else {
        Err(failures)
    }
}

/// `run_all` for work that produces no value.
///
/// # Errors
///
/// Returns an `AggregatedFailure` holding one entry per failed worker.
pub async fn run_all_unit<I, F, Fut>(items: I, work: F) -> Result<(), AggregatedFailure>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<(), FleetError>>,
{
    run_all(items, work).await.map(|_| ())
}
