//! Collision-free run directory allocation.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use super::CaptureError;

/// Creates and returns a fresh directory `{base}/{YYYYMMDDTHHMMSSZ}_{label}`.
///
/// When that name is taken, `_1`, `_2`, ... suffixes are tried in order. The
/// directory is created atomically, so two calls never return the same path
/// even within one clock second.
///
/// # Errors
///
/// Returns [`CaptureError::Io`] if `base` cannot be created or a candidate
/// fails for a reason other than already existing.
pub fn build_run_dir(base: &Path, label: &str) -> Result<PathBuf, CaptureError> {
    fs::create_dir_all(base).map_err(|e| CaptureError::io(base, e))?;

    let stem = format!("{}_{label}", Utc::now().format("%Y%m%dT%H%M%SZ"));
    let mut candidate = base.join(&stem);
    let mut suffix = 0u32;

    loop {
        match fs::create_dir(&candidate) {
            Ok(()) => {
                debug!(path = %candidate.display(), "allocated run directory");
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                suffix += 1;
                candidate = base.join(format!("{stem}_{suffix}"));
            }
            Err(e) => return Err(CaptureError::io(&candidate, e)),
        }
    }
}
