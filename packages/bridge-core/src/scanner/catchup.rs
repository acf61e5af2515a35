//! Parallel catch-up over a height range.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::ScanContext;

/// Split `[start, end)` into at most `workers` contiguous sub-ranges. Fewer than
/// `min_batch` heights collapse to a single range. The last range ends at `end`.
pub fn partition_range(start: u64, end: u64, workers: usize, min_batch: u64) -> Vec<(u64, u64)> {
    if end <= start {
        return Vec::new();
    }
    let count = end - start;
    let workers = if count < min_batch {
        1
    } else {
        (workers.max(1) as u64).min(count)
    };
    let step = count / workers;
    (0..workers)
        .map(|i| {
            let from = start + i * step;
            let to = if i + 1 == workers { end } else { from + step };
            (from, to)
        })
        .collect()
}

/// A running catch-up over `[start, end)`.
pub struct CatchUpJob {
    pub start: u64,
    pub end: u64,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CatchUpJob {
    pub(crate) fn spawn(ctx: Arc<ScanContext>, start: u64, end: u64, shutdown: watch::Receiver<bool>) -> Self {
        let (cancel, cancel_rx) = watch::channel(false);
        let ranges = partition_range(start, end, ctx.config.workers, ctx.config.min_batch);
        info!(
            role = %ctx.role(),
            start,
            end,
            workers = ranges.len(),
            "Starting catch-up"
        );
        let handle = tokio::spawn(async move {
            let mut set = JoinSet::new();
            for (from, to) in ranges {
                let ctx = ctx.clone();
                let cancel = cancel_rx.clone();
                let shutdown = shutdown.clone();
                set.spawn(async move { scan_range(ctx, from, to, cancel, shutdown).await });
            }
            while let Some(res) = set.join_next().await {
                if let Err(e) = res {
                    warn!(error = %e, "Catch-up worker panicked");
                }
            }
            debug!(start, end, "Catch-up finished");
        });
        Self {
            start,
            end,
            cancel,
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal cancellation; workers stop at their next height boundary.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for every worker to return.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Catch-up supervisor panicked");
        }
    }
}

fn stopped(cancel: &watch::Receiver<bool>, shutdown: &watch::Receiver<bool>) -> bool {
    *cancel.borrow() || *shutdown.borrow()
}

/// Scan heights `from..to` in order. A height is retried until its block is fully
/// processed. Cancellation is honored between heights only.
pub(crate) async fn scan_range(
    ctx: Arc<ScanContext>,
    from: u64,
    to: u64,
    mut cancel: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut height = from;
    while height < to {
        if stopped(&cancel, &shutdown) {
            debug!(role = %ctx.role(), from, to, at = height, "Catch-up worker cancelled");
            return;
        }
        match ctx.bridge.get_block_by_number(height).await {
            Ok(block) => {
                if ctx.process_block(&block).await {
                    height += 1;
                    continue;
                }
                warn!(role = %ctx.role(), height, "Block not fully processed, retrying");
            }
            Err(e) => {
                warn!(role = %ctx.role(), height, error = %e, "Failed to fetch block, retrying");
                ctx.observer.on_scan_error(ctx.role(), e.kind());
            }
        }
        let signalled = tokio::select! {
            _ = tokio::time::sleep(ctx.config.retry_interval) => Ok(()),
            res = cancel.changed() => res,
            res = shutdown.changed() => res,
        };
        // a dropped job handle or shutdown sender ends the worker
        if signalled.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covers(ranges: &[(u64, u64)], start: u64, end: u64) {
        assert_eq!(ranges.first().unwrap().0, start);
        assert_eq!(ranges.last().unwrap().1, end);
        for w in ranges.windows(2) {
            assert_eq!(w[0].1, w[1].0, "ranges must be contiguous");
        }
        for r in ranges {
            assert!(r.0 < r.1, "ranges must be non-empty");
        }
    }

    #[test]
    fn test_partition_even_split() {
        let r = partition_range(100, 200, 4, 10);
        assert_eq!(r, vec![(100, 125), (125, 150), (150, 175), (175, 200)]);
    }

    #[test]
    fn test_partition_remainder_goes_to_last() {
        let r = partition_range(0, 103, 4, 10);
        assert_eq!(r.len(), 4);
        assert_eq!(r[3], (75, 103));
        covers(&r, 0, 103);
    }

    #[test]
    fn test_partition_small_range_single_worker() {
        assert_eq!(partition_range(50, 59, 4, 10), vec![(50, 59)]);
    }

    #[test]
    fn test_partition_empty_range() {
        assert!(partition_range(10, 10, 4, 10).is_empty());
        assert!(partition_range(10, 5, 4, 10).is_empty());
    }

    #[test]
    fn test_partition_covers_exactly() {
        for (start, end, workers) in [(0u64, 10u64, 4usize), (7, 1000, 3), (1, 11, 16), (0, 64, 1)] {
            let r = partition_range(start, end, workers, 10);
            covers(&r, start, end);
            let total: u64 = r.iter().map(|(a, b)| b - a).sum();
            assert_eq!(total, end - start);
        }
    }
}
