use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::client::Transcriber;
use crate::config::BatchConfig;
use crate::executor::BoundedExecutor;
use crate::protocol::{RunResult, TaskOutcome};
use crate::tracker::{NoopProgress, ProgressSink};
use crate::worker::RetryingTask;
use crate::workset::WorkSetResolver;
use crate::{BatchError, Result};

/// Top-level batch runner: resolve, dispatch, wait, summarise
pub struct BatchOrchestrator {
    transcriber: Arc<dyn Transcriber>,
    progress: Arc<dyn ProgressSink>,
    resolver: WorkSetResolver,
    executor: BoundedExecutor,
    config: BatchConfig,
    cancel: CancelToken,
}

impl BatchOrchestrator {
    /// Create an orchestrator; fails if the concurrency limit is unusable
    pub fn new(transcriber: Arc<dyn Transcriber>, config: BatchConfig) -> Result<Self> {
        let executor = BoundedExecutor::new(config.concurrency)?.with_failure_policy(config.failure_policy);
        let resolver = WorkSetResolver::new(&config.audio_extension, &config.result_extension);

        Ok(Self {
            transcriber,
            progress: Arc::new(NoopProgress),
            resolver,
            executor,
            config,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that stops further work when cancelled
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn available_permits(&self) -> usize {
        self.executor.available_permits()
    }

    /// Process every outstanding recording in `input_dir` into `output_dir`
    ///
    /// Individual failures are reported in the returned [`RunResult`]; only
    /// directory problems abort the run.
    pub async fn run(&self, input_dir: &Path, output_dir: &Path) -> Result<RunResult> {
        let run_id = Uuid::new_v4();
        info!(
            "Starting run {}: {} -> {} (overwrite={}, concurrency={})",
            run_id,
            input_dir.display(),
            output_dir.display(),
            self.config.overwrite,
            self.executor.concurrency()
        );

        ensure_output_dir(output_dir).await?;

        let work_set = self
            .resolver
            .resolve(input_dir, output_dir, self.config.overwrite)
            .await?;

        let mut result = RunResult::new(run_id);
        for input in work_set.already_done {
            result.record(input, TaskOutcome::Skipped);
        }

        if work_set.items.is_empty() {
            info!("Run {}: nothing to do ({} already processed)", run_id, result.skipped);
            result.finish();
            return Ok(result);
        }

        // Fail-fast cancels only this run; the orchestrator's token stays usable
        let task = RetryingTask::new(
            Arc::clone(&self.transcriber),
            self.config.options.clone(),
            self.config.retry.clone(),
            self.config.overwrite,
            self.cancel.child_token(),
        );

        self.progress.start(work_set.items.len());
        self.executor
            .execute(work_set.items, &task, self.progress.as_ref(), &mut result)
            .await;
        self.progress.finish();

        result.finish();
        if result.is_success() {
            info!("Run {} finished: {}", run_id, result);
        } else {
            warn!("Run {} finished with failures: {}", run_id, result);
        }

        Ok(result)
    }
}

/// Create the output directory (and parents) if it does not exist
pub async fn ensure_output_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| BatchError::OutputDirectoryCreate {
            path: path.to_path_buf(),
            source,
        })
}
