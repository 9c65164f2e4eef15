//! Bounded fetch pool.
//!
//! Runs one task per item with at most `concurrency` in flight. A task
//! reports success as a bool; failures never cancel siblings. Cancelling
//! the token stops new launches, and in-flight tasks receive a child token
//! so they can abort their own I/O.

use futures::future;
use futures::stream::{self, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Aggregate outcome of a pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Tasks started
    pub launched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items never started because the pool was cancelled
    pub skipped: usize,
}

impl PoolReport {
    pub fn all_failed(&self) -> bool {
        self.succeeded == 0
    }
}

/// Concurrency-capped task runner, local to one job.
#[derive(Debug, Clone, Copy)]
pub struct FetchPool {
    concurrency: usize,
}

impl FetchPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Pool honoring a request override that may lower but never raise `cap`.
    pub fn capped(requested: Option<usize>, cap: usize) -> Self {
        let cap = cap.max(1);
        Self::new(requested.map_or(cap, |r| r.min(cap)))
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `task` over every item.
    pub async fn run<T, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        task: F,
    ) -> PoolReport
    where
        F: Fn(T, CancellationToken) -> Fut,
        Fut: Future<Output = bool>,
    {
        let total = items.len();

        let outcomes: Vec<bool> = stream::iter(items)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|item| task(item, cancel.child_token()))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        let report = PoolReport {
            launched: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            skipped: total - outcomes.len(),
        };

        debug!(
            concurrency = self.concurrency,
            launched = report.launched,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Fetch pool finished"
        );
        report
    }
}
