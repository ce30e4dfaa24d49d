use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::client::TranscribeError;

/// Extension recognised on input recordings
pub const DEFAULT_AUDIO_EXTENSION: &str = "wav";
/// Extension given to result documents
pub const DEFAULT_RESULT_EXTENSION: &str = "json";

/// An audio recording found in the input directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InputFile {
    path: PathBuf,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without its final extension, used to match result documents
    pub fn stem(&self) -> String {
        file_stem(&self.path)
    }
}

impl fmt::Display for InputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// One input recording paired with the result document it should produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub input: InputFile,
    pub output: PathBuf,
}

impl WorkItem {
    /// Pair an input with `<output_dir>/<stem>.<result_extension>`
    pub fn new(input: InputFile, output_dir: &Path, result_extension: &str) -> Self {
        let output = output_dir.join(format!("{}.{}", input.stem(), result_extension));
        Self { input, output }
    }
}

/// Terminal result of processing one work item
#[derive(Debug)]
pub enum TaskOutcome {
    Succeeded,
    /// The result document already existed and overwrite was off
    Skipped,
    Failed(TaskError),
}

impl TaskOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed(_))
    }
}

/// Errors confined to a single work item
#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error("cannot read input {}: {source}", .path.display())]
    InputRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write result {}: {source}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize result: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("recognition failed after {attempts} attempt(s): {source}")]
    RemoteCall {
        attempts: u32,
        #[source]
        source: TranscribeError,
    },

    #[error("cancelled before completion")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),
}

/// A failed work item together with its error
#[derive(Debug)]
pub struct TaskFailure {
    pub input: InputFile,
    pub error: TaskError,
}

/// Aggregate of every outcome produced by one batch run
#[derive(Debug)]
pub struct RunResult {
    pub run_id: Uuid,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<TaskFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn new(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Fold one outcome into the counts
    pub fn record(&mut self, input: InputFile, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Succeeded => self.succeeded += 1,
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::Failed(error) => {
                self.failed += 1;
                self.failures.push(TaskFailure { input, error });
            }
        }
    }

    /// Number of outcomes recorded so far
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "succeeded={}, skipped={}, failed={}, elapsed={}ms",
            self.succeeded,
            self.skipped,
            self.failed,
            self.elapsed().num_milliseconds()
        )
    }
}

/// Fixed options sent with every recognition request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizeOptions {
    /// MIME type of the uploaded audio
    pub content_type: String,
    /// Request per-word timestamps
    pub timestamps: bool,
    /// Confidence threshold for returning word alternatives
    pub word_alternatives_threshold: f32,
    /// Language model identifier
    pub model: String,
}

impl Default for RecognizeOptions {
    fn default() -> Self {
        Self {
            content_type: "audio/wav".to_string(),
            timestamps: true,
            word_alternatives_threshold: 0.9,
            model: "ja-JP_BroadbandModel".to_string(),
        }
    }
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
