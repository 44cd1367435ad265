//! Environment-driven settings.
//!
//! Values come from the process environment, after an optional `.env` file
//! is loaded. Every variable is optional; the SEC user agent and NRC key are
//! only checked when a live request targets those hosts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::capture::{CaptureOptions, DEFAULT_GZIP_MIN_BYTES, DEFAULT_PRETTY_MAX_BYTES};
use crate::fetch::constants::{DEFAULT_MAX_ARTIFACT_BYTES, LONG_READ_TIMEOUT};
use crate::fetch::{FetchConfig, RetryPolicy, TimeoutProfile};

const DEFAULT_DB_PATH: &str = "./data/harvest.db";
const DEFAULT_BLOB_DIR: &str = "./blobs";
const DEFAULT_FIXTURE_ROOT: &str = "tests/fixtures";

/// Resolved application settings.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub blob_dir: PathBuf,
    /// Base directory for per-run capture directories.
    pub run_dir: PathBuf,
    pub fixture_root: PathBuf,
    pub capture_pretty_max_bytes: u64,
    pub capture_gzip_min_bytes: u64,
    pub max_artifact_bytes: u64,
    pub long_read_timeout: Duration,
    pub debug: bool,
    pub sec_user_agent: Option<String>,
    pub nrc_subscription_key: Option<String>,
}

impl Settings {
    /// Loads `.env` if present, then reads the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable when a value fails validation.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable when a value fails validation.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let db_path =
            get("APP_DB_PATH").map_or_else(|| PathBuf::from(DEFAULT_DB_PATH), expand_path);
        let blob_dir =
            get("APP_BLOB_DIR").map_or_else(|| PathBuf::from(DEFAULT_BLOB_DIR), expand_path);
        let run_dir = get("APP_RUN_DIR").map_or_else(|| default_run_dir(&db_path), expand_path);
        let fixture_root = get("APP_FIXTURE_ROOT")
            .map_or_else(|| PathBuf::from(DEFAULT_FIXTURE_ROOT), expand_path);

        let capture_pretty_max_bytes = parse_u64(
            "APP_CAPTURE_PRETTY_MAX_BYTES",
            get("APP_CAPTURE_PRETTY_MAX_BYTES"),
            DEFAULT_PRETTY_MAX_BYTES,
        )?;
        let capture_gzip_min_bytes = parse_u64(
            "APP_CAPTURE_GZIP_MIN_BYTES",
            get("APP_CAPTURE_GZIP_MIN_BYTES"),
            DEFAULT_GZIP_MIN_BYTES,
        )?;
        let max_artifact_bytes = parse_u64(
            "APP_MAX_ARTIFACT_BYTES",
            get("APP_MAX_ARTIFACT_BYTES"),
            DEFAULT_MAX_ARTIFACT_BYTES,
        )?;
        if max_artifact_bytes == 0 {
            bail!("Invalid APP_MAX_ARTIFACT_BYTES value: 0. Expected a positive byte count");
        }
        let long_read_secs = parse_u64(
            "APP_LONG_READ_TIMEOUT_SECS",
            get("APP_LONG_READ_TIMEOUT_SECS"),
            LONG_READ_TIMEOUT.as_secs(),
        )?;
        if long_read_secs == 0 {
            bail!(
                "Invalid APP_LONG_READ_TIMEOUT_SECS value: 0. Expected a positive number of seconds"
            );
        }

        let debug = match get("APP_DEBUG") {
            None => false,
            Some(value) => parse_bool(&value)
                .with_context(|| format!("Invalid APP_DEBUG value: {value}"))?,
        };

        let nrc_subscription_key =
            get("NRC_SUBSCRIPTION_KEY").or_else(|| get("NRC_APS_SUBSCRIPTION_KEY"));

        Ok(Self {
            db_path,
            blob_dir,
            run_dir,
            fixture_root,
            capture_pretty_max_bytes,
            capture_gzip_min_bytes,
            max_artifact_bytes,
            long_read_timeout: Duration::from_secs(long_read_secs),
            debug,
            sec_user_agent: get("SEC_USER_AGENT"),
            nrc_subscription_key,
        })
    }

    /// Fetch client configuration for this run.
    #[must_use]
    pub fn fetch_config(&self, live: bool) -> FetchConfig {
        FetchConfig {
            live,
            fixture_root: self.fixture_root.clone(),
            sec_user_agent: self.sec_user_agent.clone(),
            nrc_subscription_key: self.nrc_subscription_key.clone(),
            max_artifact_bytes: self.max_artifact_bytes,
            default_timeouts: TimeoutProfile::metadata(),
            long_read_timeouts: TimeoutProfile::long_read(self.long_read_timeout),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Capture options for one run.
    #[must_use]
    pub fn capture_options(&self, provider: &str, live: bool, limit: usize) -> CaptureOptions {
        CaptureOptions {
            pretty_max_bytes: self.capture_pretty_max_bytes,
            gzip_min_bytes: self.capture_gzip_min_bytes,
            ..CaptureOptions::new(provider, live, limit)
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("db_path", &self.db_path)
            .field("blob_dir", &self.blob_dir)
            .field("run_dir", &self.run_dir)
            .field("fixture_root", &self.fixture_root)
            .field("capture_pretty_max_bytes", &self.capture_pretty_max_bytes)
            .field("capture_gzip_min_bytes", &self.capture_gzip_min_bytes)
            .field("max_artifact_bytes", &self.max_artifact_bytes)
            .field("long_read_timeout", &self.long_read_timeout)
            .field("debug", &self.debug)
            .field("sec_user_agent", &self.sec_user_agent)
            .field(
                "nrc_subscription_key",
                &self.nrc_subscription_key.as_ref().map(|_| "<set>"),
            )
            .finish()
    }
}

fn expand_path(raw: String) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

fn default_run_dir(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("runs")
}

fn parse_u64(name: &str, raw: Option<String>, default: u64) -> Result<u64> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let cleaned = raw.replace('_', "");
    cleaned
        .parse::<u64>()
        .with_context(|| format!("Invalid {name} value: {raw}. Expected a non-negative integer"))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected one of 1/true/yes/on or 0/false/no/off, got '{other}'"),
    }
}
