//! Constants for the fetch module (timeouts, quotas, size limits).

use std::time::Duration;

/// Connect timeout shared by both timeout profiles (10 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout for small metadata requests (30 seconds).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout for large document downloads (5 minutes).
pub const LONG_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout applied to buffered requests (30 seconds).
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle pooled connection timeout (10 seconds).
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum response body size (50 MiB).
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 50 * 1024 * 1024;

/// Requests per second for the SEC host family.
pub const SEC_HOST_RPS: f64 = 10.0;

/// Requests per second for every other host.
pub const DEFAULT_HOST_RPS: f64 = 5.0;

/// Requests per second per (subscription key, host) pair.
pub const CREDENTIAL_RPS: f64 = 3.0;

/// Warning threshold for cumulative rate limit delay per bucket (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);
