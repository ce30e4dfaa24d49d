use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::client::Transcriber;
use crate::protocol::{RecognizeOptions, TaskError, TaskOutcome, WorkItem};

/// Bounded exponential backoff for recognition calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Ceiling for any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Effective attempt count, never below one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given (1-based) attempt failed
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Runs the skip-check, read, recognize and write steps for one work item
#[derive(Clone)]
pub struct RetryingTask {
    transcriber: Arc<dyn Transcriber>,
    options: Arc<RecognizeOptions>,
    policy: RetryPolicy,
    overwrite: bool,
    cancel: CancelToken,
}

impl RetryingTask {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        options: RecognizeOptions,
        policy: RetryPolicy,
        overwrite: bool,
        cancel: CancelToken,
    ) -> Self {
        Self {
            transcriber,
            options: Arc::new(options),
            policy,
            overwrite,
            cancel,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Process one item; always yields exactly one outcome
    pub async fn run(&self, item: &WorkItem) -> TaskOutcome {
        if self.cancel.is_cancelled() {
            return TaskOutcome::Failed(TaskError::Cancelled);
        }

        // Another task or process may have produced the result since resolution
        if !self.overwrite && output_exists(&item.output).await {
            debug!("Skipping {}: {} already exists", item.input, item.output.display());
            return TaskOutcome::Skipped;
        }

        let audio = match tokio::fs::read(item.input.path()).await {
            Ok(audio) => audio,
            Err(source) => {
                return TaskOutcome::Failed(TaskError::InputRead {
                    path: item.input.path().to_path_buf(),
                    source,
                })
            }
        };

        let result = match self.recognize(item, &audio).await {
            Ok(result) => result,
            Err(e) => return TaskOutcome::Failed(e),
        };

        let document = match serde_json::to_vec_pretty(&result) {
            Ok(document) => document,
            Err(e) => return TaskOutcome::Failed(e.into()),
        };

        if let Err(source) = write_atomically(&item.output, &document).await {
            return TaskOutcome::Failed(TaskError::OutputWrite {
                path: item.output.clone(),
                source,
            });
        }

        info!("Wrote {} ({} bytes)", item.output.display(), document.len());
        TaskOutcome::Succeeded
    }

    /// Call the recognizer until it succeeds, fails permanently, or attempts run out
    async fn recognize(&self, item: &WorkItem, audio: &[u8]) -> Result<serde_json::Value, TaskError> {
        let attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("Recognizing {} (attempt {}/{})", item.input, attempt, attempts);

            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
                response = self.transcriber.transcribe(audio, &self.options) => response,
            };

            let error = match response {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if attempt == attempts || !error.is_transient() {
                warn!(
                    "Recognition of {} failed on attempt {}/{}: {}",
                    item.input, attempt, attempts, error
                );
                return Err(TaskError::RemoteCall {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.policy.backoff_after(attempt);
            warn!(
                "Recognition of {} failed on attempt {}/{}: {}; retrying in {:?}",
                item.input, attempt, attempts, error, delay
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }
}

/// Only a regular file counts as an existing result, matching the resolver
async fn output_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
}

/// Write via a sibling temp file so a partial document is never left under the final name
async fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
