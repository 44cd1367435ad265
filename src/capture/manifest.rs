//! Records written to `run.json`, `artifacts.json` and per-attempt metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Final outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every planned item was processed.
    Succeeded,
    /// The run aborted; see `error.txt`.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Arguments the run was started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArgs {
    pub provider: String,
    pub live: bool,
    pub limit: usize,
}

/// Totals recorded in the final manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Physical attempts captured.
    pub attempts: u64,
    /// Response rows persisted.
    pub responses: u64,
    /// Artifact rows newly inserted.
    pub artifacts: u64,
    /// Parse errors recorded.
    pub parse_errors: u64,
}

/// Lightweight pointer to one captured attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub id: u64,
    pub meta_path: String,
    pub raw_path: String,
    pub status_code: u16,
    pub url: String,
}

/// One downloaded artifact stored in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub source_url: String,
    pub sha256: String,
    pub blob_path: String,
}

/// A response body that could not be interpreted; the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseErrorRecord {
    pub provider: String,
    pub item_index: usize,
    pub message: String,
    /// Row id of the stored response that failed to parse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<i64>,
}

/// Contents of `run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub provider: String,
    pub args: RunArgs,
    pub live: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: RunStatus,
    pub exception: Option<String>,
    pub counts: RunCounts,
    pub responses: Vec<ResponseSummary>,
    pub artifacts: Vec<ArtifactEntry>,
    pub parse_errors: Vec<ParseErrorRecord>,
}

/// Contents of `artifacts.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub artifacts: Vec<ArtifactEntry>,
}

/// Contents of `requests/NNNN_<method>.json`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct RequestRecord {
    pub id: u64,
    pub method: String,
    pub url: String,
    pub attempt_number: u32,
    /// Parsed JSON when the payload is JSON, raw text otherwise.
    pub payload: Value,
    pub headers: Value,
}

/// Contents of `responses/NNNN_<method>.meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptMeta {
    pub id: u64,
    pub method: String,
    pub url: String,
    pub attempt_number: u32,
    pub status_code: u16,
    pub request_path: String,
    pub raw_path: String,
    pub pretty_path: Option<String>,
    pub gzip_path: Option<String>,
    pub byte_count: u64,
    pub sha256: String,
    pub request_headers: Value,
    pub response_headers: Value,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}
