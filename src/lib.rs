//! Speech Batch - transcribe a directory of recordings
//!
//! Every `.wav` file in an input directory is sent to a speech recognition
//! service and the JSON result is written to `<stem>.json` in an output
//! directory. The crate's core is the batch engine:
//!
//! - Work set resolution that skips inputs whose result already exists
//! - Per-file tasks with exponential-backoff retries
//! - A bounded executor that caps concurrently active tasks
//! - A run summary that reports failures as data instead of aborting
//!
//! # Example
//!
//! ```no_run
//! use speech_batch::{BatchConfig, BatchOrchestrator, ProgressTracker, SpeechToTextClient};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = SpeechToTextClient::new("api-key", "https://stt.example.com")?;
//!     let orchestrator = BatchOrchestrator::new(Arc::new(client), BatchConfig::default())?
//!         .with_progress(Arc::new(ProgressTracker::new()));
//!
//!     let result = orchestrator
//!         .run(Path::new("/data/audio"), Path::new("/data/transcripts"))
//!         .await?;
//!     println!("{}", result);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod client;
pub mod config;
pub mod executor;
pub mod protocol;
pub mod service;
pub mod tracker;
pub mod worker;
pub mod workset;

// Re-export commonly used types for convenience
pub use cancel::CancelToken;
pub use client::{SpeechToTextClient, TranscribeError, Transcriber};
pub use config::{BatchConfig, ConfigError, Credentials};
pub use executor::{BoundedExecutor, FailurePolicy};
pub use protocol::{InputFile, RecognizeOptions, RunResult, TaskError, TaskFailure, TaskOutcome, WorkItem};
pub use service::BatchOrchestrator;
pub use tracker::{NoopProgress, ProgressSink, ProgressTracker};
pub use worker::{RetryPolicy, RetryingTask};
pub use workset::{WorkSet, WorkSetResolver};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a whole run before any work is dispatched
#[derive(Error, Debug)]
pub enum BatchError {
    /// Input or output directory could not be listed
    #[error("cannot list directory {}: {source}", .path.display())]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Output directory was missing and could not be created
    #[error("cannot create output directory {}: {source}", .path.display())]
    OutputDirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Concurrency limit outside `1..=Semaphore::MAX_PERMITS`
    #[error(
        "invalid concurrency limit {0}; must be between 1 and {}",
        tokio::sync::Semaphore::MAX_PERMITS
    )]
    InvalidConcurrency(usize),
}

/// Result type alias for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
