// End-to-end tests for the batch engine
//
// These drive BatchOrchestrator against real temp directories with stub
// recognizers, covering idempotent re-runs, overwrite, the concurrency bound,
// retries, and permit hygiene after failures.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use speech_batch::{
    BatchConfig, BatchOrchestrator, ProgressTracker, RecognizeOptions, RetryPolicy, RunResult,
    TaskError, TranscribeError, Transcriber,
};

/// Stub recognizer with in-flight gauge and programmable failures
#[derive(Default)]
struct StubTranscriber {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    /// Number of leading calls that fail
    fail_first: usize,
    /// Fail every call whose audio equals this payload
    poison: Option<Vec<u8>>,
    delay: Duration,
}

impl StubTranscriber {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for StubTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        options: &RecognizeOptions,
    ) -> Result<serde_json::Value, TranscribeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if call <= self.fail_first {
            return Err(TranscribeError::Other(format!("transient failure {call}")));
        }
        if self.poison.as_deref() == Some(audio) {
            return Err(TranscribeError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        Ok(serde_json::json!({
            "model": options.model,
            "audio_bytes": audio.len(),
            "results": [],
        }))
    }
}

struct Fixture {
    _temp_dir: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl Fixture {
    fn new(inputs: &[&str]) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("audio");
        let output = temp_dir.path().join("transcripts");
        std::fs::create_dir_all(&input).unwrap();

        for name in inputs {
            std::fs::write(input.join(name), format!("RIFF-{name}")).unwrap();
        }

        Self {
            _temp_dir: temp_dir,
            input,
            output,
        }
    }

    fn seed_output(&self, name: &str, contents: &[u8]) {
        std::fs::create_dir_all(&self.output).unwrap();
        std::fs::write(self.output.join(name), contents).unwrap();
    }

    fn output_names(&self) -> HashSet<String> {
        std::fs::read_dir(&self.output)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}

fn config(overwrite: bool, concurrency: usize, attempts: u32) -> BatchConfig {
    BatchConfig {
        overwrite,
        concurrency,
        retry: RetryPolicy::new(attempts)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(4)),
        ..Default::default()
    }
}

fn orchestrator(transcriber: Arc<StubTranscriber>, config: BatchConfig) -> BatchOrchestrator {
    BatchOrchestrator::new(transcriber, config).unwrap()
}

/// Short label for the error recorded against the input named `name`
fn failure_kind(result: &RunResult, name: &str) -> &'static str {
    let failure = result
        .failures
        .iter()
        .find(|f| f.input.path().file_name() == Some(std::ffi::OsStr::new(name)))
        .unwrap_or_else(|| panic!("no failure recorded for {name}"));

    match failure.error {
        TaskError::InputRead { .. } => "read",
        TaskError::RemoteCall { .. } => "remote",
        TaskError::OutputWrite { .. } => "write",
        _ => "other",
    }
}

fn names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("rec{i:02}.wav")).collect()
}

#[tokio::test]
async fn test_two_files_empty_output() {
    let fixture = Fixture::new(&["a.wav", "b.wav"]);
    let transcriber = Arc::new(StubTranscriber::default());

    let result = orchestrator(transcriber, config(false, 2, 3))
        .run(&fixture.input, &fixture.output)
        .await
        .unwrap();

    assert_eq!((result.succeeded, result.skipped, result.failed), (2, 0, 0));
    let outputs = fixture.output_names();
    assert!(outputs.contains("a.json"));
    assert!(outputs.contains("b.json"));
    assert_eq!(outputs.len(), 2);
}

#[tokio::test]
async fn test_existing_output_is_skipped() {
    let fixture = Fixture::new(&["a.wav", "b.wav"]);
    fixture.seed_output("a.json", b"{\"prior\":true}");
    let transcriber = Arc::new(StubTranscriber::default());

    let result = orchestrator(transcriber.clone(), config(false, 2, 3))
        .run(&fixture.input, &fixture.output)
        .await
        .unwrap();

    assert_eq!((result.succeeded, result.skipped, result.failed), (1, 1, 0));
    assert_eq!(transcriber.calls(), 1);
    assert_eq!(
        std::fs::read(fixture.output.join("a.json")).unwrap(),
        b"{\"prior\":true}"
    );
}

#[tokio::test]
async fn test_always_failing_recognizer() {
    let fixture = Fixture::new(&["a.wav"]);
    let transcriber = Arc::new(StubTranscriber {
        fail_first: usize::MAX,
        ..Default::default()
    });

    let result = orchestrator(transcriber.clone(), config(false, 4, 3))
        .run(&fixture.input, &fixture.output)
        .await
        .unwrap();

    assert_eq!((result.succeeded, result.skipped, result.failed), (0, 0, 1));
    assert_eq!(transcriber.calls(), 3);
    assert!(!fixture.output.join("a.json").exists());
    assert!(matches!(
        result.failures[0].error,
        TaskError::RemoteCall { attempts: 3, .. }
    ));
    assert_eq!(result.failures[0].input.stem(), "a");
}

#[tokio::test]
async fn test_succeeds_on_third_attempt() {
    let fixture = Fixture::new(&["a.wav"]);
    let transcriber = Arc::new(StubTranscriber {
        fail_first: 2,
        ..Default::default()
    });

    let result = orchestrator(transcriber.clone(), config(false, 1, 3))
        .run(&fixture.input, &fixture.output)
        .await
        .unwrap();

    assert_eq!(result.succeeded, 1);
    assert_eq!(transcriber.calls(), 3);
}

#[tokio::test]
async fn test_outcome_count_matches_inputs_for_every_bound() {
    let inputs = names(7);
    let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();

    for concurrency in 1..=inputs.len() {
        let fixture = Fixture::new(&refs);
        let transcriber = Arc::new(StubTranscriber {
            poison: Some(b"RIFF-rec03.wav".to_vec()),
            ..Default::default()
        });

        let result = orchestrator(transcriber, config(false, concurrency, 2))
            .run(&fixture.input, &fixture.output)
            .await
            .unwrap();

        assert_eq!(result.total(), inputs.len(), "concurrency {concurrency}");
        assert_eq!(result.failed, 1, "concurrency {concurrency}");
        assert_eq!(result.succeeded, inputs.len() - 1, "concurrency {concurrency}");
    }
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let inputs = names(5);
    let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
    let fixture = Fixture::new(&refs);
    let transcriber = Arc::new(StubTranscriber::default());
    let orchestrator = orchestrator(transcriber.clone(), config(false, 3, 3));

    let first = orchestrator.run(&fixture.input, &fixture.output).await.unwrap();
    assert_eq!(first.succeeded, 5);

    let second = orchestrator.run(&fixture.input, &fixture.output).await.unwrap();
    assert_eq!(second.succeeded, 0);
    assert_eq!(second.skipped, 5);
    assert_eq!(second.failed, 0);
    assert_eq!(transcriber.calls(), 5);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_overwrite_replaces_sentinel() {
    let fixture = Fixture::new(&["x.wav"]);
    fixture.seed_output("x.json", b"sentinel");
    let transcriber = Arc::new(StubTranscriber::default());

    let result = orchestrator(transcriber, config(true, 2, 3))
        .run(&fixture.input, &fixture.output)
        .await
        .unwrap();

    assert_eq!(result.succeeded, 1);
    assert_eq!(result.skipped, 0);
    let written = std::fs::read(fixture.output.join("x.json")).unwrap();
    assert_ne!(written, b"sentinel");

    let document: serde_json::Value = serde_json::from_slice(&written).unwrap();
    assert_eq!(document["model"], "ja-JP_BroadbandModel");
    // Pretty-printed with two-space indentation
    assert!(String::from_utf8(written).unwrap().contains("\n  \"audio_bytes\""));
}

#[tokio::test]
async fn test_concurrency_bound_respected() {
    let inputs = names(20);
    let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
    let fixture = Fixture::new(&refs);
    let transcriber = Arc::new(StubTranscriber {
        delay: Duration::from_millis(15),
        ..Default::default()
    });

    let result = orchestrator(transcriber.clone(), config(false, 4, 3))
        .run(&fixture.input, &fixture.output)
        .await
        .unwrap();

    assert_eq!(result.succeeded, 20);
    assert!(transcriber.peak() <= 4, "peak {} exceeded bound", transcriber.peak());
    assert!(transcriber.peak() >= 2, "expected some parallelism");
}

#[tokio::test]
async fn test_permits_not_leaked_after_failures() {
    // First run: read, recognize and write failures all in one batch
    let fixture = Fixture::new(&["bad.wav", "ok.wav", "poison.wav", "blocked.wav"]);
    std::fs::create_dir_all(&fixture.output).unwrap();
    // A directory where the temp file would go makes the write fail
    std::fs::create_dir_all(fixture.output.join("blocked.json.tmp")).unwrap();
    // A dangling symlink is listed as an input but cannot be read
    #[cfg(unix)]
    {
        std::fs::remove_file(fixture.input.join("bad.wav")).unwrap();
        std::os::unix::fs::symlink(
            fixture.input.join("missing-target"),
            fixture.input.join("bad.wav"),
        )
        .unwrap();
    }

    let transcriber = Arc::new(StubTranscriber {
        poison: Some(b"RIFF-poison.wav".to_vec()),
        delay: Duration::from_millis(5),
        ..Default::default()
    });
    let orchestrator = orchestrator(transcriber.clone(), config(false, 2, 2));

    let first = orchestrator.run(&fixture.input, &fixture.output).await.unwrap();
    assert_eq!(first.total(), 4);
    assert_eq!(first.skipped, 0);
    #[cfg(unix)]
    {
        assert_eq!(first.succeeded, 1);
        assert_eq!(first.failed, 3);
        assert_eq!(failure_kind(&first, "bad.wav"), "read");
        assert_eq!(failure_kind(&first, "poison.wav"), "remote");
        assert_eq!(failure_kind(&first, "blocked.wav"), "write");
    }
    assert_eq!(orchestrator.available_permits(), 2);

    // Second run over a fresh work set still honours the bound
    let inputs = names(10);
    let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
    let fresh = Fixture::new(&refs);
    let before = transcriber.peak.swap(0, Ordering::SeqCst);
    assert!(before <= 2);

    let second = orchestrator.run(&fresh.input, &fresh.output).await.unwrap();
    assert_eq!(second.succeeded, 10);
    assert!(transcriber.peak() <= 2);
    assert_eq!(orchestrator.available_permits(), 2);
}

#[tokio::test]
async fn test_progress_sees_every_dispatched_item() {
    let fixture = Fixture::new(&["a.wav", "b.wav", "c.wav"]);
    fixture.seed_output("c.json", b"{}");
    let tracker = Arc::new(ProgressTracker::new());
    let transcriber = Arc::new(StubTranscriber {
        poison: Some(b"RIFF-b.wav".to_vec()),
        ..Default::default()
    });

    let result = orchestrator(transcriber, config(false, 2, 1))
        .with_progress(tracker.clone())
        .run(&fixture.input, &fixture.output)
        .await
        .unwrap();

    assert_eq!(tracker.total(), 2);
    assert_eq!(tracker.completed(), 2);
    assert_eq!(tracker.failed(), 1);
    assert_eq!((result.succeeded, result.skipped, result.failed), (1, 1, 1));
}

#[tokio::test]
async fn test_cancel_during_run_accounts_for_every_item() {
    let inputs = names(8);
    let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
    let fixture = Fixture::new(&refs);
    let transcriber = Arc::new(StubTranscriber {
        delay: Duration::from_millis(200),
        ..Default::default()
    });
    let orchestrator = orchestrator(transcriber, config(false, 2, 3));

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let result = orchestrator.run(&fixture.input, &fixture.output).await.unwrap();

    assert_eq!(result.total(), 8);
    assert_eq!(result.failed, 8);
    assert!(result
        .failures
        .iter()
        .all(|f| matches!(f.error, TaskError::Cancelled)));
    assert_eq!(orchestrator.available_permits(), 2);
}

#[tokio::test]
async fn test_missing_input_dir_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let transcriber = Arc::new(StubTranscriber::default());

    let err = orchestrator(transcriber, config(false, 1, 1))
        .run(&temp_dir.path().join("absent"), &temp_dir.path().join("out"))
        .await
        .unwrap_err();

    assert!(matches!(err, speech_batch::BatchError::DirectoryAccess { .. }));
}

/// Completion order is free; every stem is still processed exactly once
#[tokio::test]
async fn test_each_input_processed_once() {
    struct RecordingTranscriber {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Transcriber for RecordingTranscriber {
        async fn transcribe(
            &self,
            audio: &[u8],
            _options: &RecognizeOptions,
        ) -> Result<serde_json::Value, TranscribeError> {
            tokio::time::sleep(Duration::from_millis((audio.len() % 5) as u64)).await;
            self.seen.lock().unwrap().push(audio.len());
            Ok(serde_json::json!({}))
        }
    }

    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("in");
    std::fs::create_dir_all(&input).unwrap();
    for i in 1..=12usize {
        std::fs::write(input.join(format!("f{i:02}.wav")), vec![0u8; i]).unwrap();
    }

    let transcriber = Arc::new(RecordingTranscriber {
        seen: Mutex::new(Vec::new()),
    });
    let orchestrator = BatchOrchestrator::new(transcriber.clone(), config(false, 5, 1)).unwrap();
    let output = temp_dir.path().join("out");
    let result = orchestrator.run(&input, &output).await.unwrap();

    assert_eq!(result.succeeded, 12);
    let mut seen = transcriber.seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, (1..=12).collect::<Vec<_>>());
    assert!(output.join("f07.json").exists());
}
