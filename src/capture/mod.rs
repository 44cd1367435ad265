//! Per-run audit trail of every physical fetch attempt.
//!
//! A [`RunCapture`] owns one run directory:
//!
//! ```text
//! <run_dir>/
//!   requests/0001_get.json         request record (redacted headers)
//!   responses/0001_get.raw.bin     raw body, always written
//!   responses/0001_get.raw.bin.gz  gzip copy, bodies >= gzip floor
//!   responses/0001_get.json        pretty JSON, small JSON bodies only
//!   responses/0001_get.meta.json   attempt metadata
//!   artifacts.json                 artifact manifest, rewritten on update
//!   run.json                       final manifest, written once
//!   error.txt                      failed runs only
//! ```
//!
//! Attempts arrive through the fetch client's observer, which must be
//! `Send + Sync`; share the capture as `Arc<Mutex<RunCapture>>` and build the
//! observer with [`attempt_observer`].

mod error;
mod manifest;
mod redact;
mod run_dir;

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

pub use error::CaptureError;
pub use manifest::{
    ArtifactEntry, ArtifactManifest, AttemptMeta, ParseErrorRecord, ResponseSummary, RunArgs,
    RunCounts, RunManifest, RunStatus,
};
pub use redact::{REDACTION_MARKER, is_sensitive_key, redact_headers, redact_value};
pub use run_dir::build_run_dir;

use crate::fetch::{Attempt, AttemptObserver};
use crate::hashing::sha256_hex;
use manifest::RequestRecord;

/// Default ceiling for writing a pretty-printed JSON copy (2 MB).
pub const DEFAULT_PRETTY_MAX_BYTES: u64 = 2_000_000;

/// Default floor for writing a gzip copy (5 MB).
pub const DEFAULT_GZIP_MIN_BYTES: u64 = 5_000_000;

/// Run identity and capture thresholds.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub provider: String,
    pub live: bool,
    pub limit: usize,
    /// Bodies up to this size get a pretty JSON copy.
    pub pretty_max_bytes: u64,
    /// Bodies at least this size get a gzip copy.
    pub gzip_min_bytes: u64,
}

impl CaptureOptions {
    /// Options with default thresholds.
    #[must_use]
    pub fn new(provider: impl Into<String>, live: bool, limit: usize) -> Self {
        Self {
            provider: provider.into(),
            live,
            limit,
            pretty_max_bytes: DEFAULT_PRETTY_MAX_BYTES,
            gzip_min_bytes: DEFAULT_GZIP_MIN_BYTES,
        }
    }
}

/// Capture sink for one run.
#[derive(Debug)]
pub struct RunCapture {
    run_dir: PathBuf,
    options: CaptureOptions,
    started_at: DateTime<Utc>,
    attempt_counter: u64,
    responses: Vec<ResponseSummary>,
    artifacts: Vec<ArtifactEntry>,
    parse_errors: Vec<ParseErrorRecord>,
    finalized: bool,
}

impl RunCapture {
    /// Opens `run_dir` for capture, creating it and its subdirectories.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Io`] if a directory cannot be created.
    pub fn new(run_dir: impl Into<PathBuf>, options: CaptureOptions) -> Result<Self, CaptureError> {
        let run_dir = run_dir.into();
        for dir in [run_dir.join("requests"), run_dir.join("responses")] {
            fs::create_dir_all(&dir).map_err(|e| CaptureError::io(&dir, e))?;
        }
        Ok(Self {
            run_dir,
            options,
            started_at: Utc::now(),
            attempt_counter: 0,
            responses: Vec::new(),
            artifacts: Vec::new(),
            parse_errors: Vec::new(),
            finalized: false,
        })
    }

    /// Run directory root.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Number of attempts captured so far.
    #[must_use]
    pub fn attempt_count(&self) -> u64 {
        self.attempt_counter
    }

    /// Response summaries captured so far.
    #[must_use]
    pub fn responses(&self) -> &[ResponseSummary] {
        &self.responses
    }

    /// Writes the records for one attempt and returns its 1-based id.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] if a record cannot be written. An unparseable
    /// JSON body only skips the pretty copy.
    #[instrument(skip(self, attempt), fields(url = %attempt.url, attempt = attempt.attempt_number))]
    pub fn capture_attempt(&mut self, attempt: &Attempt) -> Result<u64, CaptureError> {
        self.attempt_counter += 1;
        let id = self.attempt_counter;
        let stem = format!("{id:04}_{}", attempt.method.to_lowercase());

        let request_rel = format!("requests/{stem}.json");
        let request_headers = redact_headers(&attempt.request_headers);
        let request = RequestRecord {
            id,
            method: attempt.method.clone(),
            url: attempt.url.clone(),
            attempt_number: attempt.attempt_number,
            payload: redact_value(&json_or_text(attempt.request_payload.as_deref())),
            headers: request_headers.clone(),
        };
        self.write_json(&request_rel, &request)?;

        let raw_rel = format!("responses/{stem}.raw.bin");
        let raw_path = self.run_dir.join(&raw_rel);
        fs::write(&raw_path, &attempt.body).map_err(|e| CaptureError::io(&raw_path, e))?;

        let byte_count = attempt.body.len() as u64;
        let gzip_path = if byte_count >= self.options.gzip_min_bytes {
            let rel = format!("responses/{stem}.raw.bin.gz");
            self.write_gzip(&rel, &attempt.body)?;
            Some(rel)
        } else {
            None
        };

        let pretty_path = if byte_count <= self.options.pretty_max_bytes
            && is_json_content(attempt)
        {
            self.write_pretty(&format!("responses/{stem}.json"), &attempt.body)?
        } else {
            None
        };

        let meta_rel = format!("responses/{stem}.meta.json");
        let meta = AttemptMeta {
            id,
            method: attempt.method.clone(),
            url: attempt.url.clone(),
            attempt_number: attempt.attempt_number,
            status_code: attempt.status_code,
            request_path: request_rel,
            raw_path: raw_rel.clone(),
            pretty_path,
            gzip_path,
            byte_count,
            sha256: sha256_hex(&attempt.body),
            request_headers,
            response_headers: redact_headers(&attempt.response_headers),
            error_type: attempt.error_kind.clone(),
            error_message: attempt.error_message.clone(),
        };
        self.write_json(&meta_rel, &meta)?;

        self.responses.push(ResponseSummary {
            id,
            meta_path: meta_rel,
            raw_path: raw_rel,
            status_code: attempt.status_code,
            url: attempt.url.clone(),
        });
        debug!(id, bytes = byte_count, "attempt captured");
        Ok(id)
    }

    /// Records a parse error for the final manifest.
    pub fn add_parse_error(&mut self, record: ParseErrorRecord) {
        self.parse_errors.push(record);
    }

    /// Replaces the artifact list and rewrites `artifacts.json` immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] if the manifest cannot be written.
    pub fn set_artifacts(&mut self, artifacts: Vec<ArtifactEntry>) -> Result<(), CaptureError> {
        self.artifacts = artifacts;
        let manifest = ArtifactManifest {
            artifacts: self.artifacts.clone(),
        };
        self.write_json("artifacts.json", &manifest)
    }

    /// Writes `error.txt`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Io`] on write failure.
    pub fn write_error(&self, message: &str) -> Result<(), CaptureError> {
        let path = self.run_dir.join("error.txt");
        fs::write(&path, message).map_err(|e| CaptureError::io(&path, e))
    }

    /// Writes `run.json` and returns the manifest.
    ///
    /// `attempts` and `parse_errors` counts come from what this capture
    /// recorded; `responses` and `artifacts` are supplied by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::AlreadyFinalized`] once a manifest has been
    /// written, or a write error. A failed write leaves the capture open so
    /// the run can still be finalized as failed.
    #[instrument(skip(self, exception), fields(run_dir = %self.run_dir.display()))]
    pub fn finalize(
        &mut self,
        status: RunStatus,
        responses: u64,
        artifacts: u64,
        exception: Option<String>,
    ) -> Result<RunManifest, CaptureError> {
        if self.finalized {
            return Err(CaptureError::AlreadyFinalized {
                run_dir: self.run_dir.clone(),
            });
        }

        let manifest = RunManifest {
            provider: self.options.provider.clone(),
            args: RunArgs {
                provider: self.options.provider.clone(),
                live: self.options.live,
                limit: self.options.limit,
            },
            live: self.options.live,
            started_at: self.started_at,
            ended_at: Utc::now(),
            status,
            exception,
            counts: RunCounts {
                attempts: self.attempt_counter,
                responses,
                artifacts,
                parse_errors: self.parse_errors.len() as u64,
            },
            responses: self.responses.clone(),
            artifacts: self.artifacts.clone(),
            parse_errors: self.parse_errors.clone(),
        };
        self.write_json("run.json", &manifest)?;
        self.finalized = true;
        debug!(%status, attempts = self.attempt_counter, "run finalized");
        Ok(manifest)
    }

    fn write_json<T: Serialize>(&self, rel: &str, value: &T) -> Result<(), CaptureError> {
        let path = self.run_dir.join(rel);
        let file = fs::File::create(&path).map_err(|e| CaptureError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)
            .map_err(|e| CaptureError::serialize(&path, e))?;
        writer.flush().map_err(|e| CaptureError::io(&path, e))
    }

    fn write_gzip(&self, rel: &str, body: &[u8]) -> Result<(), CaptureError> {
        let path = self.run_dir.join(rel);
        let file = fs::File::create(&path).map_err(|e| CaptureError::io(&path, e))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        encoder
            .write_all(body)
            .map_err(|e| CaptureError::io(&path, e))?;
        let mut writer = encoder.finish().map_err(|e| CaptureError::io(&path, e))?;
        writer.flush().map_err(|e| CaptureError::io(&path, e))
    }

    /// Writes a pretty copy if `body` parses as JSON; otherwise skips it.
    fn write_pretty(&self, rel: &str, body: &[u8]) -> Result<Option<String>, CaptureError> {
        let Ok(parsed) = serde_json::from_slice::<Value>(body) else {
            debug!(path = rel, "body is not valid JSON, skipping pretty copy");
            return Ok(None);
        };
        let path = self.run_dir.join(rel);
        let mut text =
            serde_json::to_string_pretty(&parsed).map_err(|e| CaptureError::serialize(&path, e))?;
        text.push('\n');
        fs::write(&path, text).map_err(|e| CaptureError::io(&path, e))?;
        Ok(Some(rel.to_string()))
    }
}

/// Builds a fetch observer that records every attempt into `capture`.
///
/// Capture failures are logged and dropped so they never alter the fetch
/// outcome.
#[must_use]
pub fn attempt_observer(capture: &Arc<Mutex<RunCapture>>) -> AttemptObserver {
    let capture = Arc::clone(capture);
    Arc::new(move |attempt: &Attempt| {
        let mut guard = capture.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = guard.capture_attempt(attempt) {
            warn!(error = %e, url = %attempt.url, "failed to capture attempt");
        }
    })
}

fn json_or_text(payload: Option<&str>) -> Value {
    match payload {
        None => Value::Null,
        Some(text) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        }
    }
}

fn is_json_content(attempt: &Attempt) -> bool {
    attempt
        .response_headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-type"))
        .is_some_and(|(_, value)| value.to_lowercase().contains("json"))
}
