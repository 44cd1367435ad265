//! One complete run: wire limiter, fetch client, capture and pipeline
//! together, then finalize the run manifest on either outcome.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info, instrument, warn};

use crate::capture::{CaptureError, RunCapture, RunManifest, RunStatus, attempt_observer};
use crate::config::Settings;
use crate::fetch::{FetchClient, RateLimiter};
use crate::pipeline::{PipelineError, PipelineOutcome, PipelineRunner};
use crate::provider::Provider;
use crate::storage::{BlobStore, Database};

/// What to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub provider: Provider,
    pub live: bool,
    pub limit: usize,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub manifest: RunManifest,
    pub outcome: PipelineOutcome,
}

/// Executes one run, capturing into `run_dir`.
///
/// On success the artifact manifest, parse errors and `run.json` (status
/// `succeeded`) are written. On failure `error.txt` is written and `run.json`
/// is finalized with status `failed`, zero counts and the error text; the
/// original error is then returned.
///
/// # Errors
///
/// Returns [`PipelineError`] if the capture directory cannot be opened or the
/// pipeline fails.
#[instrument(skip(settings), fields(run_dir = %run_dir.display()))]
pub async fn execute(
    settings: &Settings,
    options: RunOptions,
    run_dir: &Path,
) -> Result<RunReport, PipelineError> {
    let provider = options.provider;
    let capture = RunCapture::new(
        run_dir,
        settings.capture_options(provider.name(), options.live, options.limit),
    )?;
    let capture = Arc::new(Mutex::new(capture));

    info!(provider = %provider, live = options.live, limit = options.limit, "run started");
    let result = run_pipeline(settings, options, &capture).await;
    let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);

    // Success bookkeeping can still fail; that failure finalizes the run too.
    let result = result.and_then(|outcome| {
        let manifest = record_success(&mut capture, &outcome)?;
        Ok((manifest, outcome))
    });

    match result {
        Ok((manifest, outcome)) => {
            info!(
                responses = outcome.responses,
                artifacts = outcome.artifacts,
                attempts = manifest.counts.attempts,
                "run succeeded"
            );
            Ok(RunReport {
                run_dir: run_dir.to_path_buf(),
                manifest,
                outcome,
            })
        }
        Err(e) => {
            let message = e.to_string();
            error!(error = %message, "run failed");
            if let Err(write_err) = capture.write_error(&message) {
                warn!(error = %write_err, "failed to write error.txt");
            }
            if let Err(finalize_err) = capture.finalize(RunStatus::Failed, 0, 0, Some(message)) {
                warn!(error = %finalize_err, "failed to finalize run manifest");
            }
            Err(e)
        }
    }
}

fn record_success(
    capture: &mut RunCapture,
    outcome: &PipelineOutcome,
) -> Result<RunManifest, CaptureError> {
    capture.set_artifacts(outcome.artifact_manifest.clone())?;
    for record in &outcome.parse_errors {
        capture.add_parse_error(record.clone());
    }
    capture.finalize(RunStatus::Succeeded, outcome.responses, outcome.artifacts, None)
}

async fn run_pipeline(
    settings: &Settings,
    options: RunOptions,
    capture: &Arc<Mutex<RunCapture>>,
) -> Result<PipelineOutcome, PipelineError> {
    let limiter = Arc::new(RateLimiter::new());
    let client = FetchClient::new(settings.fetch_config(options.live), limiter)?
        .with_observer(attempt_observer(capture));

    let db = Database::new(&settings.db_path).await?;
    let blobs = BlobStore::open(&settings.blob_dir).await?;
    let runner = PipelineRunner::new(db.clone(), blobs);

    let outcome = runner.run(options.provider, &client, options.limit).await;
    db.close().await;
    outcome
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::capture::build_run_dir;
    use tempfile::TempDir;

    fn settings(root: &Path, fixture_root: &Path) -> Settings {
        let mut settings = Settings::from_lookup(|_| None).unwrap();
        settings.db_path = root.join("data/harvest.db");
        settings.blob_dir = root.join("blobs");
        settings.run_dir = root.join("runs");
        settings.fixture_root = fixture_root.to_path_buf();
        settings
    }

    #[tokio::test]
    async fn test_capture_failure_after_pipeline_still_finalizes_failed() {
        let temp_dir = TempDir::new().unwrap();
        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let settings = settings(temp_dir.path(), &fixtures);
        let run_dir = build_run_dir(&settings.run_dir, "sec_edgar").unwrap();
        // A directory in the way makes the artifact manifest unwritable.
        std::fs::create_dir(run_dir.join("artifacts.json")).unwrap();

        let result = execute(
            &settings,
            RunOptions {
                provider: Provider::SecEdgar,
                live: false,
                limit: 1,
            },
            &run_dir,
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Capture(_))));
        let error = std::fs::read_to_string(run_dir.join("error.txt")).unwrap();
        assert!(error.contains("artifacts.json"));

        let manifest: RunManifest =
            serde_json::from_slice(&std::fs::read(run_dir.join("run.json")).unwrap()).unwrap();
        assert_eq!(manifest.status, RunStatus::Failed);
        assert_eq!(manifest.counts.attempts, 2);
        assert_eq!(manifest.counts.responses, 0);
        assert!(manifest.exception.is_some());
    }

    #[tokio::test]
    async fn test_failed_run_writes_error_and_failed_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let settings = settings(temp_dir.path(), &temp_dir.path().join("no-fixtures"));
        let run_dir = build_run_dir(&settings.run_dir, "sec_edgar").unwrap();

        let result = execute(
            &settings,
            RunOptions {
                provider: Provider::SecEdgar,
                live: false,
                limit: 1,
            },
            &run_dir,
        )
        .await;

        assert!(result.is_err());
        let error = std::fs::read_to_string(run_dir.join("error.txt")).unwrap();
        assert!(error.contains("submissions.json"));

        let manifest: RunManifest =
            serde_json::from_slice(&std::fs::read(run_dir.join("run.json")).unwrap()).unwrap();
        assert_eq!(manifest.status, RunStatus::Failed);
        assert_eq!(manifest.counts.responses, 0);
        assert_eq!(manifest.counts.artifacts, 0);
        assert!(manifest.exception.is_some());
    }
}
