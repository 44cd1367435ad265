//! Error types for the fetch module.
//!
//! Every variant carries the URL (or fixture path) it relates to so that
//! the error text recorded in the audit trail is useful on its own.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching a document or metadata record.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Caller or environment configuration problem. Never retried.
    #[error("configuration error: {message}")]
    Config {
        /// What is missing or wrong.
        message: String,
    },

    /// The provided URL is malformed or has no host.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}: {source}")]
    Timeout {
        /// The URL that timed out.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// Network-level error (DNS resolution, connection refused, reset, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// Transient HTTP status (403, 429 or 5xx).
    #[error("retryable status code {status} for {url}")]
    RetryableStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Terminal HTTP error status (4xx other than 403/429).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Response body exceeded the configured byte cap.
    #[error("artifact too large fetching {url}: more than {limit} bytes (read {received})")]
    ArtifactTooLarge {
        /// The URL being read.
        url: String,
        /// Configured maximum.
        limit: u64,
        /// Bytes observed when the transfer was aborted.
        received: u64,
    },

    /// Offline fixture could not be read.
    #[error("failed to read fixture {path}: {source}")]
    Fixture {
        /// Fixture file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Maps a transport error from the HTTP client, separating timeouts.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url, source }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates a retryable status error.
    pub fn retryable_status(url: impl Into<String>, status: u16) -> Self {
        Self::RetryableStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a terminal HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an oversized artifact error.
    pub fn artifact_too_large(url: impl Into<String>, limit: u64, received: u64) -> Self {
        Self::ArtifactTooLarge {
            url: url.into(),
            limit,
            received,
        }
    }

    /// Creates a fixture read error.
    pub fn fixture(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Fixture {
            path: path.into(),
            source,
        }
    }

    /// Stable short name recorded as the attempt's error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::Timeout { .. } => "timeout",
            Self::Network { .. } => "network",
            Self::RetryableStatus { .. } => "retryable_status",
            Self::HttpStatus { .. } => "http_status",
            Self::ArtifactTooLarge { .. } => "artifact_too_large",
            Self::Fixture { .. } => "fixture",
        }
    }

    /// HTTP status attached to the error, if a response was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RetryableStatus { status, .. } | Self::HttpStatus { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}
