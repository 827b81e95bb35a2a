// src/workers.rs
//! Bounded fan-out for the per-source fetch and parse stages.

use std::future::Future;

use tokio::task::JoinSet;

/// Run `f` over `items` with at most `workers` tasks in flight.
///
/// Output is in input order. A slot is `None` only if its task panicked.
pub async fn map_bounded<T, R, F, Fut>(items: Vec<T>, workers: usize, f: F) -> Vec<Option<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let workers = workers.max(1);
    let mut out: Vec<Option<R>> = Vec::with_capacity(items.len());
    out.resize_with(items.len(), || None);

    let mut join_set = JoinSet::new();
    for (idx, item) in items.into_iter().enumerate() {
        if join_set.len() >= workers {
            if let Some(done) = join_set.join_next().await {
                store(&mut out, done);
            }
        }
        let fut = f(item);
        join_set.spawn(async move { (idx, fut.await) });
    }
    while let Some(done) = join_set.join_next().await {
        store(&mut out, done);
    }
    out
}

fn store<R>(out: &mut [Option<R>], done: Result<(usize, R), tokio::task::JoinError>) {
    match done {
        Ok((idx, r)) => out[idx] = Some(r),
        Err(e) => tracing::error!(error = %e, "worker task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn keeps_input_order_and_bounds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<u64> = (0..10).collect();

        let out = map_bounded(items, 3, |n| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10 - n)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                n * 2
            }
        })
        .await;

        let vals: Vec<u64> = out.into_iter().map(|o| o.unwrap()).collect();
        assert_eq!(vals, (0..10).map(|n| n * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
