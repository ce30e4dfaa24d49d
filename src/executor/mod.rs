use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::protocol::{RunResult, TaskError, TaskOutcome, WorkItem};
use crate::tracker::ProgressSink;
use crate::worker::RetryingTask;
use crate::{BatchError, Result};

/// What to do with the rest of the batch once an item fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Let every item run to its own outcome
    #[default]
    Continue,
    /// Cancel the remaining items after the first failure
    FailFast,
}

/// Runs one task per work item with at most `concurrency` active at once
pub struct BoundedExecutor {
    permits: Arc<Semaphore>,
    concurrency: usize,
    failure_policy: FailurePolicy,
}

impl BoundedExecutor {
    pub fn new(concurrency: usize) -> Result<Self> {
        if concurrency == 0 || concurrency > Semaphore::MAX_PERMITS {
            return Err(BatchError::InvalidConcurrency(concurrency));
        }

        Ok(Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            failure_policy: FailurePolicy::default(),
        })
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Permits currently free; equals `concurrency` whenever no batch is running
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Execute every item and fold each outcome into `result`
    ///
    /// Returns only after all dispatched tasks have reached a terminal outcome.
    pub async fn execute(
        &self,
        items: Vec<WorkItem>,
        task: &RetryingTask,
        progress: &dyn ProgressSink,
        result: &mut RunResult,
    ) {
        info!(
            "Dispatching {} item(s) with concurrency {}",
            items.len(),
            self.concurrency
        );

        let mut pending = FuturesUnordered::new();

        for item in items {
            let permits = Arc::clone(&self.permits);
            let task = task.clone();
            let work = item.clone();

            let handle = AbortOnDrop(tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = task.cancel_token().cancelled() => None,
                    permit = permits.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return TaskOutcome::Failed(TaskError::Cancelled);
                };

                // The permit is released when `_permit` drops, on every exit path
                task.run(&work).await
            }));

            pending.push(async move { (item, handle.await) });
        }

        let cancel = task.cancel_token();
        while let Some((item, joined)) = pending.next().await {
            let outcome = joined.unwrap_or_else(|e| {
                warn!("Task for {} did not complete: {}", item.input, e);
                TaskOutcome::Failed(TaskError::Panicked(e.to_string()))
            });

            if outcome.is_failed()
                && self.failure_policy == FailurePolicy::FailFast
                && !cancel.is_cancelled()
            {
                warn!("Cancelling remaining work after failure of {}", item.input);
                cancel.cancel();
            }

            progress.item_completed(&item, &outcome);
            result.record(item.input, outcome);
        }

        debug!("All tasks finished: {}", result);
    }
}

/// Join handle that aborts its task when dropped
///
/// Dropping an unfinished `execute` future (e.g. under a timeout) therefore
/// stops every task it spawned instead of leaving them to write results.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = std::result::Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
