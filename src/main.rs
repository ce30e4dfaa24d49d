use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use speech_batch::config::{load_env_file, Credentials};
use speech_batch::{BatchOrchestrator, ProgressTracker, SpeechToTextClient};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level: tracing::Level = args.log_level.into();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every recording was processed
async fn run(args: Args) -> Result<bool> {
    let cwd = std::env::current_dir().context("cannot get current dir")?;
    let input_dir = args.input_dir(&cwd);
    let output_dir = args.output_dir(&cwd);

    load_env_file(args.config.as_deref())?;
    let credentials = Credentials::from_env()?;

    info!("Starting {} v{}", speech_batch::NAME, speech_batch::VERSION);
    info!("  Source: {}", input_dir.display());
    info!("  Output: {}", output_dir.display());
    info!("  Service: {}", credentials.service_url);

    let client = SpeechToTextClient::new(credentials.api_key, credentials.service_url)
        .context("Failed to create recognition client")?;

    let orchestrator = BatchOrchestrator::new(Arc::new(client), args.batch_config())?
        .with_progress(Arc::new(ProgressTracker::new()));

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C signal, cancelling outstanding work");
            cancel.cancel();
        }
    });

    let result = orchestrator
        .run(&input_dir, &output_dir)
        .await
        .context("batch run failed")?;

    for failure in &result.failures {
        eprintln!("failed: {}: {}", failure.input, failure.error);
    }
    println!(
        "succeeded: {}, skipped: {}, failed: {}",
        result.succeeded, result.skipped, result.failed
    );

    Ok(result.is_success())
}
