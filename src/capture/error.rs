//! Error types for run capture.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while writing a run's capture directory.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Filesystem write or directory creation failed.
    #[error("capture I/O failed at {path}: {source}")]
    Io {
        /// Path being written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A record could not be serialized.
    #[error("failed to serialize capture record {path}: {source}")]
    Serialize {
        /// Path of the record being written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// `finalize` was called a second time for the same run.
    #[error("run capture already finalized: {run_dir}")]
    AlreadyFinalized {
        /// Run directory
        run_dir: PathBuf,
    },
}

impl CaptureError {
    /// Creates an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a serialization error for `path`.
    pub fn serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialize {
            path: path.into(),
            source,
        }
    }
}
