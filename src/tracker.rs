use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::protocol::{TaskOutcome, WorkItem};

/// Observer for batch progress
///
/// Receives one `item_completed` call per dispatched work item, in the order the
/// items reach a terminal state. Implementations must not influence the run.
pub trait ProgressSink: Send + Sync {
    /// Called once before any item is dispatched
    fn start(&self, total: usize);

    /// Called once per item when its outcome is known
    fn item_completed(&self, item: &WorkItem, outcome: &TaskOutcome);

    /// Called after the last outcome
    fn finish(&self) {}
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn start(&self, _total: usize) {}

    fn item_completed(&self, _item: &WorkItem, _outcome: &TaskOutcome) {}
}

/// Counts completions and logs a line per finished item
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ProgressStats {
        ProgressStats {
            total: self.total(),
            completed: self.completed(),
            failed: self.failed(),
        }
    }
}

impl ProgressSink for ProgressTracker {
    fn start(&self, total: usize) {
        self.total.store(total, Ordering::Release);
        self.completed.store(0, Ordering::Release);
        self.failed.store(0, Ordering::Release);
        info!("Processing {} file(s)", total);
    }

    fn item_completed(&self, item: &WorkItem, outcome: &TaskOutcome) {
        let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        let total = self.total();

        match outcome {
            TaskOutcome::Succeeded => info!("[{}/{}] done {}", done, total, item.input),
            TaskOutcome::Skipped => info!("[{}/{}] skipped {}", done, total, item.input),
            TaskOutcome::Failed(e) => {
                self.failed.fetch_add(1, Ordering::AcqRel);
                warn!("[{}/{}] failed {}: {}", done, total, item.input, e);
            }
        }
    }

    fn finish(&self) {
        info!("Progress: {}", self.stats());
    }
}

/// Snapshot of a tracker's counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgressStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl std::fmt::Display for ProgressStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "completed={}/{}, failed={}",
            self.completed, self.total, self.failed
        )
    }
}
