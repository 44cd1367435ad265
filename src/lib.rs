//! Harvest Core Library
//!
//! Fetches metadata and documents from public APIs under per-host and
//! per-credential rate limits, retries transient failures, and records every
//! physical attempt into a redacted, on-disk audit trail for the run.
//!
//! # Architecture
//!
//! - [`fetch`] - token-bucket rate limiting, retry policy, HTTP client
//! - [`capture`] - per-run capture directory and manifests
//! - [`provider`] - SEC EDGAR and NRC ADAMS APS sources
//! - [`storage`] - SQLite row store and content-addressed blob store
//! - [`pipeline`] - plan, fetch, download and persist for one provider
//! - [`run`] - one complete run with capture finalization
//! - [`config`] - environment settings

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod capture;
pub mod config;
pub mod fetch;
mod hashing;
pub mod pipeline;
pub mod provider;
pub mod run;
pub mod storage;
mod user_agent;

// Re-export commonly used types
pub use capture::{
    ArtifactEntry, CaptureError, CaptureOptions, ParseErrorRecord, RunCapture, RunManifest,
    RunStatus, build_run_dir,
};
pub use config::Settings;
pub use fetch::{
    Attempt, CapturedResponse, FetchClient, FetchConfig, FetchError, OutcomeKind, RateLimiter,
    RetryPolicy,
};
pub use hashing::sha256_hex;
pub use pipeline::{PipelineError, PipelineOutcome, PipelineRunner};
pub use provider::{Provider, ProviderError};
pub use run::{RunOptions, RunReport, execute};
pub use storage::{BlobStore, Database, StorageError};
