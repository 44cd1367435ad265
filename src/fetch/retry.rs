//! Retry classification and exponential backoff with jitter.
//!
//! Every physical attempt resolves to an [`OutcomeKind`]:
//! - [`OutcomeKind::Success`] - hand the response back to the caller
//! - [`OutcomeKind::Retryable`] - timeouts, connection failures, 403, 429, 5xx
//! - [`OutcomeKind::Fatal`] - everything else; surfaced immediately
//!
//! The [`RetryPolicy`] then decides whether another attempt is allowed and
//! how long to wait before it.
//!
//! # Example
//!
//! ```
//! use harvest_core::fetch::{OutcomeKind, RetryDecision, RetryPolicy, classify_status};
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(classify_status(503), OutcomeKind::Retryable);
//!
//! match policy.should_retry(OutcomeKind::Retryable, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::FetchError;

/// Default maximum attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff (200 ms).
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Default maximum delay cap (5 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Result class of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Response usable by the caller.
    Success,
    /// Transient failure; another attempt may succeed.
    Retryable,
    /// Failure that retrying cannot fix.
    Fatal,
}

/// Decision on whether to make another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// The upcoming attempt number (1-indexed, so the first retry is 2).
        attempt: u32,
    },

    /// Stop and surface the current outcome.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Bounded exponential backoff with jitter.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1) + jitter(0..=base_delay), max_delay)
/// ```
///
/// With defaults the waits are roughly 0.2-0.4s then 0.4-0.6s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings (`max_attempts` is at least 1).
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay cap.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Decides what to do after `attempt` (1-indexed) finished with `outcome`.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, outcome: OutcomeKind, attempt: u32) -> RetryDecision {
        match outcome {
            OutcomeKind::Success => {
                return RetryDecision::DoNotRetry {
                    reason: "attempt succeeded".to_string(),
                };
            }
            OutcomeKind::Fatal => {
                return RetryDecision::DoNotRetry {
                    reason: "fatal failure - retry would not help".to_string(),
                };
            }
            OutcomeKind::Retryable => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        (backoff + self.calculate_jitter()).min(self.max_delay)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_jitter_ms = self.base_delay.as_millis() as u64;
        if max_jitter_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=max_jitter_ms))
    }
}

/// Classifies an HTTP status code.
///
/// | Status | Kind |
/// |--------|------|
/// | < 400 | Success |
/// | 403 | Retryable (gateway throttling often surfaces as 403) |
/// | 429 | Retryable |
/// | >= 500 | Retryable |
/// | other 4xx | Fatal |
#[must_use]
pub fn classify_status(status: u16) -> OutcomeKind {
    match status {
        403 | 429 => OutcomeKind::Retryable,
        s if s >= 500 => OutcomeKind::Retryable,
        s if s >= 400 => OutcomeKind::Fatal,
        _ => OutcomeKind::Success,
    }
}

/// Classifies a fetch error.
///
/// Transport failures and retryable statuses may succeed on another try;
/// configuration, size-cap, fixture and terminal status errors may not.
#[must_use]
pub fn classify_error(error: &FetchError) -> OutcomeKind {
    match error {
        FetchError::Timeout { .. }
        | FetchError::Network { .. }
        | FetchError::RetryableStatus { .. } => OutcomeKind::Retryable,
        FetchError::Config { .. }
        | FetchError::InvalidUrl { .. }
        | FetchError::HttpStatus { .. }
        | FetchError::ArtifactTooLarge { .. }
        | FetchError::Fixture { .. } => OutcomeKind::Fatal,
    }
}
