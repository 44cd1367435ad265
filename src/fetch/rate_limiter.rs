//! Token-bucket rate limiting keyed by host and by (credential, host).
//!
//! The [`RateLimiter`] owns two lazily populated bucket maps behind a single
//! mutex. Callers compute their wait while holding the lock and sleep after
//! releasing it, so one slow bucket never blocks accounting on another.
//!
//! # Example
//!
//! ```
//! use harvest_core::fetch::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new();
//!
//! // The first `rps` requests to a host are a burst and proceed immediately.
//! limiter.acquire_host("data.sec.gov", 10.0).await;
//!
//! // Subscription gateways are additionally throttled per key.
//! limiter.acquire_credential("key-1", "adams-api.nrc.gov", 3.0).await;
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use super::constants::CUMULATIVE_DELAY_WARNING_THRESHOLD;

/// Smallest accepted refill rate; guards against division by zero.
const MIN_RATE_PER_SECOND: f64 = 0.001;

/// Single-key token bucket.
///
/// Refill is lazy: every [`consume`](Self::consume) first adds
/// `elapsed * rate` tokens, capped at `capacity`. When a caller has to wait,
/// the bucket books the wait as already elapsed by moving `last_refill` into
/// the future, so concurrent and sequential callers queue up behind each
/// other instead of sharing one refill.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate_per_second: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
    cumulative_wait: Duration,
}

impl TokenBucket {
    /// Creates a full bucket with capacity `max(rate, 1)`.
    #[must_use]
    pub fn new(rate_per_second: f64) -> Self {
        Self::new_at(rate_per_second, Instant::now())
    }

    /// Creates a full bucket whose refill clock starts at `now`.
    #[must_use]
    pub fn new_at(rate_per_second: f64, now: Instant) -> Self {
        let rate_per_second = rate_per_second.max(MIN_RATE_PER_SECOND);
        let capacity = rate_per_second.max(1.0);
        Self {
            rate_per_second,
            capacity,
            tokens: capacity,
            last_refill: now,
            cumulative_wait: Duration::ZERO,
        }
    }

    /// Refills, then takes `amount` tokens or returns how long to wait.
    pub fn consume(&mut self, amount: f64) -> Duration {
        self.consume_at(Instant::now(), amount)
    }

    /// Deterministic form of [`consume`](Self::consume) for a given clock reading.
    ///
    /// Negative or non-finite amounts take nothing and never wait.
    pub fn consume_at(&mut self, now: Instant, amount: f64) -> Duration {
        if !amount.is_finite() || amount < 0.0 {
            return Duration::ZERO;
        }

        // A booked wait leaves `last_refill` ahead of `now`; nothing accrues until then.
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate_per_second)
            .min(self.capacity);
        if self.last_refill < now {
            self.last_refill = now;
        }

        if self.tokens >= amount {
            self.tokens -= amount;
            return Duration::ZERO;
        }

        let deficit = amount - self.tokens;
        let backlog = self.last_refill.saturating_duration_since(now);
        let wait = backlog + Duration::from_secs_f64(deficit / self.rate_per_second);
        self.tokens = 0.0;
        self.last_refill = now + wait;
        self.cumulative_wait += wait;
        wait
    }

    /// Tokens currently available, as of the last refill.
    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum number of tokens the bucket holds.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Configured refill rate.
    #[must_use]
    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }

    /// Total wait this bucket has handed out.
    #[must_use]
    pub fn cumulative_wait(&self) -> Duration {
        self.cumulative_wait
    }
}

#[derive(Debug, Default)]
struct Buckets {
    hosts: HashMap<String, TokenBucket>,
    credentials: HashMap<(String, String), TokenBucket>,
}

/// Host-scoped and credential-scoped rate limiter.
///
/// Construct one per run and share it (by reference or `Arc`) with every
/// fetch client. Fairness between concurrent callers is best-effort.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    /// Creates a limiter with no buckets; buckets appear on first use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the host bucket grants one request.
    #[instrument(skip(self))]
    pub async fn acquire_host(&self, host: &str, rps: f64) {
        let (wait, cumulative) = {
            let mut buckets = self.lock();
            let bucket = buckets
                .hosts
                .entry(host.to_string())
                .or_insert_with(|| TokenBucket::new(rps));
            (bucket.consume(1.0), bucket.cumulative_wait())
        };
        pause("host", host, wait, cumulative).await;
    }

    /// Waits until the (credential, host) bucket grants one request.
    ///
    /// Independent of [`acquire_host`](Self::acquire_host); gateways that
    /// multiplex many subscription keys behind one hostname are checked
    /// against both, host first.
    #[instrument(skip(self, credential))]
    pub async fn acquire_credential(&self, credential: &str, host: &str, rps: f64) {
        let (wait, cumulative) = {
            let mut buckets = self.lock();
            let bucket = buckets
                .credentials
                .entry((credential.to_string(), host.to_string()))
                .or_insert_with(|| TokenBucket::new(rps));
            (bucket.consume(1.0), bucket.cumulative_wait())
        };
        pause("credential", host, wait, cumulative).await;
    }

    /// Number of host buckets created so far.
    #[must_use]
    pub fn host_bucket_count(&self) -> usize {
        self.lock().hosts.len()
    }

    /// Number of credential buckets created so far.
    #[must_use]
    pub fn credential_bucket_count(&self) -> usize {
        self.lock().credentials.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn pause(scope: &'static str, host: &str, wait: Duration, cumulative: Duration) {
    if wait.is_zero() {
        return;
    }
    debug!(
        scope,
        host = %host,
        delay_ms = wait.as_millis(),
        cumulative_ms = cumulative.as_millis(),
        "applying rate limit delay"
    );
    if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
        warn!(
            scope,
            host = %host,
            cumulative_delay_secs = cumulative.as_secs(),
            "excessive rate limiting - consider reducing request volume to this host"
        );
    }
    tokio::time::sleep(wait).await;
}

/// Extracts the lowercase host from a URL, or `None` when it has none.
///
/// ```
/// use harvest_core::fetch::extract_host;
///
/// assert_eq!(extract_host("https://Data.SEC.gov/x").as_deref(), Some("data.sec.gov"));
/// assert_eq!(extract_host("not a url"), None);
/// ```
#[must_use]
pub fn extract_host(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_starts_full_with_minimum_capacity_one() {
        let bucket = TokenBucket::new(0.5);
        assert!((bucket.capacity() - 1.0).abs() < f64::EPSILON);
        assert!((bucket.tokens() - 1.0).abs() < f64::EPSILON);

        let bucket = TokenBucket::new(10.0);
        assert!((bucket.capacity() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bucket_burst_then_wait() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(2.0, start);
        assert_eq!(bucket.consume_at(start, 1.0), Duration::ZERO);
        assert_eq!(bucket.consume_at(start, 1.0), Duration::ZERO);

        let wait = bucket.consume_at(start, 1.0);
        assert_eq!(wait, Duration::from_millis(500));
    }

    #[test]
    fn test_bucket_waits_queue_behind_each_other() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(1.0, start);
        assert_eq!(bucket.consume_at(start, 1.0), Duration::ZERO);

        let first = bucket.consume_at(start, 1.0);
        let second = bucket.consume_at(start, 1.0);
        assert_eq!(first, Duration::from_secs(1));
        assert_eq!(second, Duration::from_secs(2));
    }

    #[test]
    fn test_bucket_sequential_rate_is_sustained_after_burst() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(4.0, start);
        let mut now = start;
        for _ in 0..4 {
            assert_eq!(bucket.consume_at(now, 1.0), Duration::ZERO);
        }
        // Every further request waits a full token interval after the previous one.
        for _ in 0..8 {
            let wait = bucket.consume_at(now, 1.0);
            assert_eq!(wait, Duration::from_millis(250));
            now += wait;
        }
        assert_eq!(now - start, Duration::from_secs(2));
    }

    #[test]
    fn test_bucket_refill_is_capped_at_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(3.0, start);
        bucket.consume_at(start, 1.0);
        bucket.consume_at(start + Duration::from_secs(3600), 0.0);
        assert!((bucket.tokens() - bucket.capacity()).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bucket_ignores_negative_and_non_finite_amounts() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(2.0, start);
        bucket.consume_at(start, 1.0);

        for amount in [-5.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(bucket.consume_at(start, amount), Duration::ZERO);
            assert!((bucket.tokens() - 1.0).abs() < f64::EPSILON);
        }
        assert!(bucket.tokens() <= bucket.capacity());
        assert_eq!(bucket.cumulative_wait(), Duration::ZERO);
    }

    #[test]
    fn test_bucket_tokens_stay_within_bounds() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(5.0, start);
        let mut now = start;
        let steps_ms = [0u64, 3, 0, 250, 1, 0, 0, 900, 10_000, 7, 0, 0, 0, 0, 0, 0, 42];
        let amounts = [1.0, 2.0, 0.5, 1.0, 7.0];
        for (i, step) in steps_ms.iter().enumerate() {
            now += Duration::from_millis(*step);
            bucket.consume_at(now, amounts[i % amounts.len()]);
            assert!(bucket.tokens() >= 0.0, "tokens went negative at step {i}");
            assert!(
                bucket.tokens() <= bucket.capacity(),
                "tokens exceeded capacity at step {i}"
            );
        }
    }

    #[tokio::test]
    async fn test_rate_limiter_first_requests_are_burst() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire_host("example.com", 5.0).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_rate_limiter_sequential_calls_respect_rate() {
        let limiter = RateLimiter::new();
        let rps = 20.0;
        let n = 30;
        let start = Instant::now();
        for _ in 0..n {
            limiter.acquire_host("example.com", rps).await;
        }
        // Burst capacity is 20, so the remaining 10 calls need at least 10 / 20 s.
        let expected = Duration::from_secs_f64(f64::from(n - 20) / rps);
        assert!(
            start.elapsed() >= expected - Duration::from_millis(5),
            "elapsed {:?} < expected {:?}",
            start.elapsed(),
            expected
        );
    }

    #[tokio::test]
    async fn test_rate_limiter_hosts_are_independent() {
        let limiter = RateLimiter::new();
        limiter.acquire_host("a.example", 1.0).await;

        let start = Instant::now();
        limiter.acquire_host("b.example", 1.0).await;
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(limiter.host_bucket_count(), 2);
    }

    #[tokio::test]
    async fn test_rate_limiter_credential_buckets_keyed_by_pair() {
        let limiter = RateLimiter::new();
        limiter.acquire_credential("key-a", "gw.example", 3.0).await;
        limiter.acquire_credential("key-b", "gw.example", 3.0).await;
        limiter.acquire_credential("key-a", "other.example", 3.0).await;
        limiter.acquire_credential("key-a", "gw.example", 3.0).await;

        assert_eq!(limiter.credential_bucket_count(), 3);
        assert_eq!(limiter.host_bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_rate_limiter_credential_bucket_throttles() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        // Capacity is 1 at 1 rps, so the second call waits about a second.
        limiter.acquire_credential("key", "gw.example", 1.0).await;
        limiter.acquire_credential("key", "gw.example", 1.0).await;
        assert!(start.elapsed() >= Duration::from_millis(950));
    }

    #[test]
    fn test_extract_host_lowercases_and_strips_port() {
        assert_eq!(
            extract_host("https://LOCALHOST:8080/x").as_deref(),
            Some("localhost")
        );
        assert_eq!(extract_host(""), None);
        assert_eq!(extract_host("mailto:someone@example.com"), None);
    }
}
