use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

use speech_batch::config::{resolve_dir, BatchConfig, DEFAULT_CONCURRENCY};
use speech_batch::{FailurePolicy, RetryPolicy};

#[derive(Parser, Debug)]
#[command(name = "speech-batch")]
#[command(about = "Transcribe every .wav file in a directory to JSON")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Directory to search for recordings (default: current directory)
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Directory to write results to (default: current directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Reprocess recordings that already have a result
    #[arg(short = 'w', long)]
    pub overwrite: bool,

    /// Maximum number of recordings processed at once
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    pub parallel: usize,

    /// Attempts per recording before giving up
    #[arg(long, default_value = "3")]
    pub attempts: u32,

    /// Environment file providing API_KEY and SERVICE_URL
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stop dispatching new recordings after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

impl Args {
    pub fn input_dir(&self, cwd: &Path) -> PathBuf {
        resolve_dir(self.source.as_deref(), cwd)
    }

    pub fn output_dir(&self, cwd: &Path) -> PathBuf {
        resolve_dir(self.output.as_deref(), cwd)
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            overwrite: self.overwrite,
            concurrency: self.parallel,
            retry: RetryPolicy::new(self.attempts),
            failure_policy: if self.fail_fast {
                FailurePolicy::FailFast
            } else {
                FailurePolicy::Continue
            },
            ..Default::default()
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
