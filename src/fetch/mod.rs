//! Rate-limited, retried HTTP fetching with per-attempt capture hooks.
//!
//! # Features
//!
//! - Token-bucket quotas per host, plus per (credential, host) pair for NRC
//! - Exponential backoff with jitter on 403, 429, 5xx and transport failures
//! - Document-shaped URLs streamed under a long read timeout with a byte cap
//! - Offline mode serving fixtures with the same attempt reporting
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use harvest_core::fetch::{FetchClient, FetchConfig, RateLimiter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FetchConfig::offline("tests/fixtures");
//! let client = FetchClient::new(config, Arc::new(RateLimiter::new()))?;
//! let url = "https://data.sec.gov/submissions/CIK0000320193.json";
//! let response = client
//!     .get(url, "sec_edgar", Some("submissions.json"), None)
//!     .await?;
//! assert_eq!(response.status_code, 200);
//! # Ok(())
//! # }
//! ```

mod attempt;
mod client;
pub mod constants;
mod error;
pub mod rate_limiter;
mod retry;

pub use attempt::{Attempt, AttemptObserver, CapturedResponse, HeaderList};
pub use client::{
    FetchClient, FetchConfig, HostFamily, SUBSCRIPTION_KEY_HEADER, TimeoutProfile, TransferMode,
    select_transfer,
};
pub use error::FetchError;
pub use rate_limiter::{RateLimiter, TokenBucket, extract_host};
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, OutcomeKind, RetryDecision, RetryPolicy, classify_error, classify_status,
};
