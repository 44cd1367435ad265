//! Rate-limited, retried HTTP client that reports every physical attempt.
//!
//! [`FetchClient`] serves two modes:
//! - **live**: real requests with per-host quotas, host-specific headers,
//!   timeout profiles chosen by URL shape, a response byte cap and retries
//! - **offline**: reads `{fixture_root}/{provider}/{fixture_name}` and
//!   reports one synthetic attempt
//!
//! Small JSON metadata and multi-hundred-megabyte documents share this code
//! path, so URLs that look like documents are streamed through the long-read
//! timeout profile while everything else is read in one buffered call.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::attempt::{Attempt, AttemptObserver, CapturedResponse, HeaderList};
use super::constants::{
    CONNECT_TIMEOUT, CREDENTIAL_RPS, DEFAULT_HOST_RPS, DEFAULT_MAX_ARTIFACT_BYTES,
    DEFAULT_READ_TIMEOUT, LONG_READ_TIMEOUT, POOL_IDLE_TIMEOUT, SEC_HOST_RPS, WRITE_TIMEOUT,
};
use super::error::FetchError;
use super::rate_limiter::{RateLimiter, extract_host};
use super::retry::{OutcomeKind, RetryDecision, RetryPolicy, classify_error, classify_status};
use crate::user_agent;

/// Header carrying the NRC APS subscription key.
pub const SUBSCRIPTION_KEY_HEADER: &str = "ocp-apim-subscription-key";

/// Path suffixes that indicate a binary or full-text document.
const DOCUMENT_EXTENSIONS: &[&str] = &[
    ".pdf", ".zip", ".tar.gz", ".gz", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".htm",
    ".html", ".txt", ".xml", ".tif", ".tiff",
];

/// URL fragments of known large-document endpoints.
const LARGE_DOCUMENT_PATTERNS: &[&str] = &[
    "/archives/edgar/data/",
    "/docs/ml",
    "accessionnumber=",
    "/api/download",
];

/// Connect/read/write/pool timeouts for one class of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutProfile {
    /// TCP/TLS connect timeout.
    pub connect: Duration,
    /// Maximum idle time between reads.
    pub read: Duration,
    /// Time allowed for sending the request.
    pub write: Duration,
    /// Idle pooled connection lifetime.
    pub pool: Duration,
}

impl TimeoutProfile {
    /// Profile for small metadata requests.
    #[must_use]
    pub fn metadata() -> Self {
        Self {
            connect: CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
            write: WRITE_TIMEOUT,
            pool: POOL_IDLE_TIMEOUT,
        }
    }

    /// Profile for streamed document downloads with the given read timeout.
    #[must_use]
    pub fn long_read(read: Duration) -> Self {
        Self {
            read,
            ..Self::metadata()
        }
    }

    /// Whole-request deadline applied to buffered requests.
    #[must_use]
    pub fn request_deadline(&self) -> Duration {
        self.connect + self.read + self.write
    }
}

/// How a response body is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Metadata timeout profile with a whole-request deadline.
    Buffered,
    /// Chunked read under the long-read profile with a running byte count.
    Streaming,
}

/// Chooses the transfer mode from the URL shape.
///
/// ```
/// use harvest_core::fetch::{TransferMode, select_transfer};
///
/// assert_eq!(select_transfer("https://x.gov/doc.PDF"), TransferMode::Streaming);
/// assert_eq!(
///     select_transfer("https://data.sec.gov/submissions/CIK1.json"),
///     TransferMode::Buffered
/// );
/// ```
#[must_use]
pub fn select_transfer(url: &str) -> TransferMode {
    let lowered = url.to_lowercase();
    let path = Url::parse(url)
        .ok()
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|| lowered.clone());

    let is_document = DOCUMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        || LARGE_DOCUMENT_PATTERNS.iter().any(|p| lowered.contains(p));
    if is_document {
        TransferMode::Streaming
    } else {
        TransferMode::Buffered
    }
}

/// Hosts with their own quota and authentication rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFamily {
    /// `sec.gov` and subdomains: higher quota, mandated User-Agent.
    SecEdgar,
    /// `nrc.gov` and subdomains: subscription key plus per-key quota.
    NrcAps,
    /// Everything else.
    Generic,
}

impl HostFamily {
    /// Classifies a lowercase host name.
    #[must_use]
    pub fn from_host(host: &str) -> Self {
        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));
        if matches("sec.gov") {
            Self::SecEdgar
        } else if matches("nrc.gov") {
            Self::NrcAps
        } else {
            Self::Generic
        }
    }

    /// Host-scoped requests per second.
    #[must_use]
    pub fn host_rps(self) -> f64 {
        match self {
            Self::SecEdgar => SEC_HOST_RPS,
            Self::NrcAps | Self::Generic => DEFAULT_HOST_RPS,
        }
    }
}

/// Settings for a [`FetchClient`].
#[derive(Clone)]
pub struct FetchConfig {
    /// Live network mode; offline mode reads fixtures.
    pub live: bool,
    /// Root directory of offline fixtures.
    pub fixture_root: PathBuf,
    /// User-Agent mandated by the SEC host family.
    pub sec_user_agent: Option<String>,
    /// Subscription key for the NRC APS gateway.
    pub nrc_subscription_key: Option<String>,
    /// Response body byte cap.
    pub max_artifact_bytes: u64,
    /// Profile for buffered requests.
    pub default_timeouts: TimeoutProfile,
    /// Profile for streamed requests.
    pub long_read_timeouts: TimeoutProfile,
    /// Retry behaviour for live requests.
    pub retry_policy: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            live: false,
            fixture_root: PathBuf::from("tests/fixtures"),
            sec_user_agent: None,
            nrc_subscription_key: None,
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            default_timeouts: TimeoutProfile::metadata(),
            long_read_timeouts: TimeoutProfile::long_read(LONG_READ_TIMEOUT),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl FetchConfig {
    /// Offline configuration reading fixtures under `fixture_root`.
    #[must_use]
    pub fn offline(fixture_root: impl Into<PathBuf>) -> Self {
        Self {
            fixture_root: fixture_root.into(),
            ..Self::default()
        }
    }

    /// Live configuration with default limits.
    #[must_use]
    pub fn live() -> Self {
        Self {
            live: true,
            ..Self::default()
        }
    }
}

// Credentials must never reach logs through `{:?}`.
impl fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("live", &self.live)
            .field("fixture_root", &self.fixture_root)
            .field("sec_user_agent", &self.sec_user_agent.is_some())
            .field("nrc_subscription_key", &self.nrc_subscription_key.is_some())
            .field("max_artifact_bytes", &self.max_artifact_bytes)
            .field("default_timeouts", &self.default_timeouts)
            .field("long_read_timeouts", &self.long_read_timeouts)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

/// HTTP fetch client with rate limiting, retries and attempt reporting.
///
/// Create once per run and reuse; the underlying connection pools are shared
/// across calls.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use harvest_core::fetch::{FetchClient, FetchConfig, RateLimiter};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = Arc::new(RateLimiter::new());
/// let client = FetchClient::new(FetchConfig::live(), limiter)?
///     .with_observer(Arc::new(|attempt| println!("{} -> {}", attempt.url, attempt.status_code)));
/// let response = client
///     .get("https://example.com/data.json", "example", None, None)
///     .await?;
/// println!("{} bytes", response.body.len());
/// # Ok(())
/// # }
/// ```
pub struct FetchClient {
    config: FetchConfig,
    metadata_client: Client,
    document_client: Client,
    rate_limiter: Arc<RateLimiter>,
    observer: Option<AttemptObserver>,
}

impl fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchClient")
            .field("config", &self.config)
            .field("has_observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything needed to repeat one logical request.
struct PreparedRequest<'a> {
    method: Method,
    url: String,
    payload: Option<String>,
    json_body: Option<&'a Value>,
    headers: HeaderList,
    host: String,
    family: HostFamily,
    mode: TransferMode,
}

/// Response read to completion.
struct RawResponse {
    final_url: String,
    status: u16,
    headers: HeaderList,
    body: Vec<u8>,
}

/// Attempt that produced no usable body; status is 0 without a response.
struct FailedTransfer {
    error: FetchError,
    status: u16,
    headers: HeaderList,
}

impl FetchClient {
    /// Builds a client for `config`, sharing `rate_limiter` with other clients.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if the HTTP client cannot be built.
    #[instrument(level = "debug", skip(rate_limiter))]
    pub fn new(config: FetchConfig, rate_limiter: Arc<RateLimiter>) -> Result<Self, FetchError> {
        let metadata_client = build_client(&config.default_timeouts)?;
        let document_client = build_client(&config.long_read_timeouts)?;
        Ok(Self {
            config,
            metadata_client,
            document_client,
            rate_limiter,
            observer: None,
        })
    }

    /// Installs the callback that receives every attempt.
    #[must_use]
    pub fn with_observer(mut self, observer: AttemptObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Whether requests go to the network.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.config.live
    }

    /// Configured response byte cap.
    #[must_use]
    pub fn max_artifact_bytes(&self) -> u64 {
        self.config.max_artifact_bytes
    }

    /// Issues a GET, with optional query parameters.
    ///
    /// In offline mode `fixture_name` is required and names the file under
    /// `{fixture_root}/{provider}/` that stands in for the response body.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Config`] for a missing fixture name (offline) or a
    ///   missing host credential (live)
    /// - the last retryable error once attempts are exhausted
    /// - [`FetchError::HttpStatus`] for terminal 4xx statuses
    /// - [`FetchError::ArtifactTooLarge`] when the body exceeds the cap
    #[instrument(skip(self, params), fields(url = %url, provider = %provider))]
    pub async fn get(
        &self,
        url: &str,
        provider: &str,
        fixture_name: Option<&str>,
        params: Option<&BTreeMap<String, String>>,
    ) -> Result<CapturedResponse, FetchError> {
        let payload = params
            .filter(|p| !p.is_empty())
            .and_then(|p| serde_json::to_string(p).ok());

        if !self.config.live {
            return self
                .fetch_fixture(Method::GET, url, provider, fixture_name, payload)
                .await;
        }

        let mut parsed = Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        if let Some(params) = params.filter(|p| !p.is_empty()) {
            parsed.query_pairs_mut().extend_pairs(params.iter());
        }
        let request = self.prepare(Method::GET, parsed.as_str(), payload, None)?;
        self.execute(&request).await
    }

    /// Issues a POST, with an optional JSON body.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    #[instrument(skip(self, json_body), fields(url = %url, provider = %provider))]
    pub async fn post(
        &self,
        url: &str,
        provider: &str,
        fixture_name: Option<&str>,
        json_body: Option<&Value>,
    ) -> Result<CapturedResponse, FetchError> {
        let payload = json_body.and_then(|body| serde_json::to_string(body).ok());

        if !self.config.live {
            return self
                .fetch_fixture(Method::POST, url, provider, fixture_name, payload)
                .await;
        }

        let request = self.prepare(Method::POST, url, payload, json_body)?;
        self.execute(&request).await
    }

    async fn fetch_fixture(
        &self,
        method: Method,
        url: &str,
        provider: &str,
        fixture_name: Option<&str>,
        payload: Option<String>,
    ) -> Result<CapturedResponse, FetchError> {
        let Some(fixture_name) = fixture_name else {
            return Err(FetchError::config("fixture_name is required in offline mode"));
        };
        let path = self.config.fixture_root.join(provider).join(fixture_name);
        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| FetchError::fixture(&path, e))?;
        let headers = fixture_headers(&path, fixture_name);

        debug!(path = %path.display(), bytes = body.len(), "serving offline fixture");
        self.emit(Attempt {
            method: method.to_string(),
            url: url.to_string(),
            request_payload: payload.clone(),
            request_headers: HeaderList::new(),
            status_code: 200,
            response_headers: headers.clone(),
            body: body.clone(),
            attempt_number: 1,
            error_kind: None,
            error_message: None,
        });

        Ok(CapturedResponse {
            method: method.to_string(),
            url: url.to_string(),
            params_json: payload,
            status_code: 200,
            headers,
            body,
        })
    }

    fn prepare<'a>(
        &self,
        method: Method,
        url: &str,
        payload: Option<String>,
        json_body: Option<&'a Value>,
    ) -> Result<PreparedRequest<'a>, FetchError> {
        let host = extract_host(url).ok_or_else(|| FetchError::invalid_url(url))?;
        let family = HostFamily::from_host(&host);
        let headers = self.build_headers(family, json_body.is_some())?;
        let mode = select_transfer(url);
        debug!(host = %host, ?family, ?mode, "prepared request");

        Ok(PreparedRequest {
            method,
            url: url.to_string(),
            payload,
            json_body,
            headers,
            host,
            family,
            mode,
        })
    }

    /// Headers for one host family; fails fast on missing credentials.
    fn build_headers(&self, family: HostFamily, json: bool) -> Result<HeaderList, FetchError> {
        let mut headers = HeaderList::new();
        headers.insert("user-agent".to_string(), user_agent::client_user_agent());

        match family {
            HostFamily::SecEdgar => {
                let ua = self
                    .config
                    .sec_user_agent
                    .as_deref()
                    .filter(|ua| !ua.trim().is_empty())
                    .ok_or_else(|| {
                        FetchError::config("SEC_USER_AGENT must be set for SEC live requests")
                    })?;
                headers.insert("user-agent".to_string(), ua.to_string());
            }
            HostFamily::NrcAps => {
                let key = self.subscription_key().ok_or_else(|| {
                    FetchError::config(
                        "NRC_SUBSCRIPTION_KEY or NRC_APS_SUBSCRIPTION_KEY must be set",
                    )
                })?;
                headers.insert(SUBSCRIPTION_KEY_HEADER.to_string(), key.to_string());
            }
            HostFamily::Generic => {}
        }

        if json {
            headers.insert("accept".to_string(), "application/json".to_string());
            headers.insert("content-type".to_string(), "application/json".to_string());
        }
        Ok(headers)
    }

    fn subscription_key(&self) -> Option<&str> {
        self.config
            .nrc_subscription_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
    }

    async fn execute(&self, request: &PreparedRequest<'_>) -> Result<CapturedResponse, FetchError> {
        let policy = &self.config.retry_policy;
        let mut attempt_number = 0u32;

        loop {
            attempt_number += 1;
            self.acquire_quota(request).await;
            debug!(attempt = attempt_number, "sending request");

            let (outcome, error) = match self.send_once(request).await {
                Ok(raw) => {
                    let outcome = classify_status(raw.status);
                    let error = match outcome {
                        OutcomeKind::Success => None,
                        OutcomeKind::Retryable => {
                            Some(FetchError::retryable_status(&request.url, raw.status))
                        }
                        OutcomeKind::Fatal => {
                            Some(FetchError::http_status(&request.url, raw.status))
                        }
                    };
                    self.emit(self.attempt_record(
                        request,
                        attempt_number,
                        raw.status,
                        raw.headers.clone(),
                        raw.body.clone(),
                        error.as_ref(),
                    ));
                    match error {
                        None => {
                            info!(
                                status = raw.status,
                                bytes = raw.body.len(),
                                attempt = attempt_number,
                                "fetch complete"
                            );
                            return Ok(CapturedResponse {
                                method: request.method.to_string(),
                                url: raw.final_url,
                                params_json: request.payload.clone(),
                                status_code: raw.status,
                                headers: raw.headers,
                                body: raw.body,
                            });
                        }
                        Some(error) => (outcome, error),
                    }
                }
                Err(failed) => {
                    self.emit(self.attempt_record(
                        request,
                        attempt_number,
                        failed.status,
                        failed.headers,
                        Vec::new(),
                        Some(&failed.error),
                    ));
                    (classify_error(&failed.error), failed.error)
                }
            };

            match policy.should_retry(outcome, attempt_number) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    info!(
                        attempt = next_attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(%reason, error = %error, "request failed");
                    return Err(error);
                }
            }
        }
    }

    async fn acquire_quota(&self, request: &PreparedRequest<'_>) {
        self.rate_limiter
            .acquire_host(&request.host, request.family.host_rps())
            .await;
        if request.family == HostFamily::NrcAps
            && let Some(key) = self.subscription_key()
        {
            self.rate_limiter
                .acquire_credential(key, &request.host, CREDENTIAL_RPS)
                .await;
        }
    }

    async fn send_once(
        &self,
        request: &PreparedRequest<'_>,
    ) -> Result<RawResponse, FailedTransfer> {
        let client = match request.mode {
            TransferMode::Buffered => &self.metadata_client,
            TransferMode::Streaming => &self.document_client,
        };

        let mut builder = client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.json_body {
            builder = builder.json(body);
        }
        if request.mode == TransferMode::Buffered {
            builder = builder.timeout(self.config.default_timeouts.request_deadline());
        }

        let response = builder.send().await.map_err(|e| FailedTransfer {
            error: FetchError::transport(&request.url, e),
            status: 0,
            headers: HeaderList::new(),
        })?;

        let status = response.status().as_u16();
        let headers = header_list(response.headers());
        let final_url = response.url().to_string();
        let limit = self.config.max_artifact_bytes;

        let body = read_capped(response, &request.url, limit)
            .await
            .map_err(|error| FailedTransfer {
                error,
                status,
                headers: headers.clone(),
            })?;

        Ok(RawResponse {
            final_url,
            status,
            headers,
            body,
        })
    }

    fn attempt_record(
        &self,
        request: &PreparedRequest<'_>,
        attempt_number: u32,
        status_code: u16,
        response_headers: HeaderList,
        body: Vec<u8>,
        error: Option<&FetchError>,
    ) -> Attempt {
        Attempt {
            method: request.method.to_string(),
            url: request.url.clone(),
            request_payload: request.payload.clone(),
            request_headers: request.headers.clone(),
            status_code,
            response_headers,
            body,
            attempt_number,
            error_kind: error.map(|e| e.kind().to_string()),
            error_message: error.map(ToString::to_string),
        }
    }

    /// Hands an attempt to the observer; a panicking observer is logged, not propagated.
    fn emit(&self, attempt: Attempt) {
        let Some(observer) = &self.observer else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| observer(&attempt))).is_err() {
            warn!(
                url = %attempt.url,
                attempt = attempt.attempt_number,
                "attempt observer panicked; continuing with fetch outcome"
            );
        }
    }
}

fn build_client(profile: &TimeoutProfile) -> Result<Client, FetchError> {
    Client::builder()
        .connect_timeout(profile.connect)
        .read_timeout(profile.read)
        .pool_idle_timeout(profile.pool)
        .gzip(true)
        .user_agent(user_agent::client_user_agent())
        .build()
        .map_err(|e| FetchError::config(format!("failed to build HTTP client: {e}")))
}

/// Reads the body chunk by chunk, aborting as soon as it passes `limit`.
///
/// Both transfer modes read through here; they differ only in timeouts, so
/// a chunked response without `Content-Length` is never held past the cap.
async fn read_capped(
    response: reqwest::Response,
    url: &str,
    limit: u64,
) -> Result<Vec<u8>, FetchError> {
    if let Some(declared) = response.content_length()
        && declared > limit
    {
        debug!(declared, limit, "declared content length exceeds cap");
        return Err(FetchError::artifact_too_large(url, limit, declared));
    }

    let mut body = Vec::new();
    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::transport(url, e))?;
        received += chunk.len() as u64;
        if received > limit {
            debug!(received, limit, "aborting oversized body");
            return Err(FetchError::artifact_too_large(url, limit, received));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

fn header_list(headers: &HeaderMap) -> HeaderList {
    let mut list = HeaderList::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        list.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    list
}

fn fixture_headers(path: &Path, fixture_name: &str) -> HeaderList {
    let content_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream");
    let mut headers = HeaderList::new();
    headers.insert("content-type".to_string(), content_type.to_string());
    headers.insert("x-fixture".to_string(), fixture_name.to_string());
    headers
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tempfile::TempDir;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
    }

    fn live_client(attempts: &Arc<Mutex<Vec<Attempt>>>) -> FetchClient {
        let config = FetchConfig {
            retry_policy: fast_policy(),
            ..FetchConfig::live()
        };
        let sink = Arc::clone(attempts);
        FetchClient::new(config, Arc::new(RateLimiter::new()))
            .unwrap()
            .with_observer(Arc::new(move |attempt: &Attempt| {
                sink.lock().unwrap().push(attempt.clone());
            }))
    }

    async fn mount_statuses(server: &MockServer, route: &str, statuses: &[u16]) {
        for status in statuses {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(*status).set_body_string(format!("s{status}")))
                .up_to_n_times(1)
                .mount(server)
                .await;
        }
    }

    // ==================== URL shape ====================

    #[test]
    fn test_select_transfer_document_extensions_stream() {
        assert_eq!(select_transfer("https://a.gov/x/report.pdf"), TransferMode::Streaming);
        assert_eq!(select_transfer("https://a.gov/x/report.PDF"), TransferMode::Streaming);
        assert_eq!(select_transfer("https://a.gov/x/bundle.tar.gz"), TransferMode::Streaming);
        assert_eq!(select_transfer("https://a.gov/x/page.htm"), TransferMode::Streaming);
    }

    #[test]
    fn test_select_transfer_large_document_patterns_stream() {
        assert_eq!(
            select_transfer("https://www.sec.gov/Archives/edgar/data/320193/000032019324000123/"),
            TransferMode::Streaming
        );
        assert_eq!(
            select_transfer(
                "https://adamswebsearch2.nrc.gov/webSearch2/main.jsp?AccessionNumber=ML24001A001"
            ),
            TransferMode::Streaming
        );
    }

    #[test]
    fn test_select_transfer_metadata_is_buffered() {
        assert_eq!(
            select_transfer("https://data.sec.gov/submissions/CIK0000320193.json"),
            TransferMode::Buffered
        );
        assert_eq!(
            select_transfer("https://adams-api.nrc.gov/aps/api/search"),
            TransferMode::Buffered
        );
        // Query strings do not count as a path extension.
        assert_eq!(
            select_transfer("https://example.com/api?file=a.pdf"),
            TransferMode::Buffered
        );
    }

    #[test]
    fn test_host_family_matching() {
        assert_eq!(HostFamily::from_host("data.sec.gov"), HostFamily::SecEdgar);
        assert_eq!(HostFamily::from_host("sec.gov"), HostFamily::SecEdgar);
        assert_eq!(HostFamily::from_host("notsec.gov"), HostFamily::Generic);
        assert_eq!(HostFamily::from_host("adams-api.nrc.gov"), HostFamily::NrcAps);
        assert_eq!(HostFamily::from_host("127.0.0.1"), HostFamily::Generic);
        assert!((HostFamily::SecEdgar.host_rps() - 10.0).abs() < f64::EPSILON);
        assert!((HostFamily::Generic.host_rps() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_timeout_profiles() {
        let metadata = TimeoutProfile::metadata();
        let long = TimeoutProfile::long_read(Duration::from_secs(900));
        assert_eq!(long.read, Duration::from_secs(900));
        assert_eq!(long.connect, metadata.connect);
        assert_eq!(
            metadata.request_deadline(),
            metadata.connect + metadata.read + metadata.write
        );
    }

    // ==================== Headers ====================

    #[test]
    fn test_build_headers_generic_sets_client_identifier() {
        let client = FetchClient::new(FetchConfig::live(), Arc::new(RateLimiter::new())).unwrap();
        let headers = client.build_headers(HostFamily::Generic, false).unwrap();
        assert!(headers["user-agent"].starts_with("harvest/"));
        assert!(!headers.contains_key("content-type"));
    }

    #[test]
    fn test_build_headers_json_sets_accept_and_content_type() {
        let client = FetchClient::new(FetchConfig::live(), Arc::new(RateLimiter::new())).unwrap();
        let headers = client.build_headers(HostFamily::Generic, true).unwrap();
        assert_eq!(headers["accept"], "application/json");
        assert_eq!(headers["content-type"], "application/json");
    }

    #[test]
    fn test_build_headers_sec_requires_user_agent() {
        let client = FetchClient::new(FetchConfig::live(), Arc::new(RateLimiter::new())).unwrap();
        let result = client.build_headers(HostFamily::SecEdgar, false);
        assert!(matches!(result, Err(FetchError::Config { .. })));

        let config = FetchConfig {
            sec_user_agent: Some("Example Corp admin@example.com".to_string()),
            ..FetchConfig::live()
        };
        let client = FetchClient::new(config, Arc::new(RateLimiter::new())).unwrap();
        let headers = client.build_headers(HostFamily::SecEdgar, false).unwrap();
        assert_eq!(headers["user-agent"], "Example Corp admin@example.com");
    }

    #[test]
    fn test_build_headers_nrc_requires_subscription_key() {
        let config = FetchConfig {
            nrc_subscription_key: Some("   ".to_string()),
            ..FetchConfig::live()
        };
        let client = FetchClient::new(config, Arc::new(RateLimiter::new())).unwrap();
        assert!(matches!(
            client.build_headers(HostFamily::NrcAps, true),
            Err(FetchError::Config { .. })
        ));

        let config = FetchConfig {
            nrc_subscription_key: Some("sub-key".to_string()),
            ..FetchConfig::live()
        };
        let client = FetchClient::new(config, Arc::new(RateLimiter::new())).unwrap();
        let headers = client.build_headers(HostFamily::NrcAps, true).unwrap();
        assert_eq!(headers[SUBSCRIPTION_KEY_HEADER], "sub-key");
    }

    #[test]
    fn test_config_debug_hides_credentials() {
        let config = FetchConfig {
            nrc_subscription_key: Some("super-secret-key".to_string()),
            ..FetchConfig::live()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-key"));
    }

    // ==================== Live mode ====================

    #[tokio::test]
    async fn test_live_sec_without_user_agent_fails_before_network() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let client = live_client(&attempts);
        let result = client
            .get("https://data.sec.gov/submissions/CIK0000320193.json", "sec_edgar", None, None)
            .await;
        assert!(matches!(result, Err(FetchError::Config { .. })));
        assert!(attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_invalid_url_is_rejected() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let client = live_client(&attempts);
        let result = client.get("not-a-url", "x", None, None).await;
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_retry_then_success_records_every_attempt() {
        let server = MockServer::start().await;
        mount_statuses(&server, "/meta", &[500, 500, 200]).await;

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let client = live_client(&attempts);
        let url = format!("{}/meta", server.uri());
        let response = client.get(&url, "p", None, None).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, b"s200");
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].status_code, 500);
        assert_eq!(attempts[0].attempt_number, 1);
        assert_eq!(attempts[0].error_kind.as_deref(), Some("retryable_status"));
        assert_eq!(attempts[1].attempt_number, 2);
        assert_eq!(attempts[2].attempt_number, 3);
        assert!(!attempts[2].is_error());
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_retryable_error() {
        let server = MockServer::start().await;
        mount_statuses(&server, "/meta", &[500, 502, 503]).await;

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let client = live_client(&attempts);
        let url = format!("{}/meta", server.uri());
        let result = client.get(&url, "p", None, None).await;

        match result {
            Err(FetchError::RetryableStatus { status, .. }) => assert_eq!(status, 503),
            other => panic!("Expected RetryableStatus, got: {other:?}"),
        }
        assert_eq!(attempts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_forbidden_then_success_on_second_attempt() {
        let server = MockServer::start().await;
        mount_statuses(&server, "/meta", &[403, 200]).await;

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let client = live_client(&attempts);
        let url = format!("{}/meta", server.uri());
        let response = client.get(&url, "p", None, None).await.unwrap();

        assert_eq!(response.status_code, 200);
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].attempt_number, 2);
    }

    #[tokio::test]
    async fn test_not_found_is_terminal_after_one_attempt() {
        let server = MockServer::start().await;
        mount_statuses(&server, "/missing", &[404, 200]).await;

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let client = live_client(&attempts);
        let url = format!("{}/missing", server.uri());
        let result = client.get(&url, "p", None, None).await;

        assert!(matches!(result, Err(FetchError::HttpStatus { status: 404, .. })));
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].error_kind.as_deref(), Some("http_status"));
        assert_eq!(attempts[0].body, b"s404");
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_with_status_zero_then_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let config = FetchConfig {
            retry_policy: fast_policy(),
            default_timeouts: TimeoutProfile {
                connect: Duration::from_millis(500),
                read: Duration::from_millis(300),
                write: Duration::from_millis(200),
                pool: Duration::from_secs(1),
            },
            ..FetchConfig::live()
        };
        let sink = Arc::clone(&attempts);
        let client = FetchClient::new(config, Arc::new(RateLimiter::new()))
            .unwrap()
            .with_observer(Arc::new(move |a: &Attempt| sink.lock().unwrap().push(a.clone())));

        let url = format!("{}/slow", server.uri());
        let response = client.get(&url, "p", None, None).await.unwrap();

        assert_eq!(response.body, b"ok");
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts[0].status_code, 0);
        assert_eq!(attempts[0].error_kind.as_deref(), Some("timeout"));
        assert!(attempts[0].body.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_stream_aborts_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let config = FetchConfig {
            retry_policy: fast_policy(),
            max_artifact_bytes: 1024,
            ..FetchConfig::live()
        };
        let sink = Arc::clone(&attempts);
        let client = FetchClient::new(config, Arc::new(RateLimiter::new()))
            .unwrap()
            .with_observer(Arc::new(move |a: &Attempt| sink.lock().unwrap().push(a.clone())));

        let url = format!("{}/big.pdf", server.uri());
        let result = client.get(&url, "p", None, None).await;

        match result {
            Err(FetchError::ArtifactTooLarge { limit, received, .. }) => {
                assert_eq!(limit, 1024);
                assert!(received > 1024);
            }
            other => panic!("Expected ArtifactTooLarge, got: {other:?}"),
        }
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].error_kind.as_deref(), Some("artifact_too_large"));
        assert!(attempts[0].body.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_buffered_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; 2048]))
            .mount(&server)
            .await;

        let config = FetchConfig {
            max_artifact_bytes: 100,
            ..FetchConfig::live()
        };
        let client = FetchClient::new(config, Arc::new(RateLimiter::new())).unwrap();
        let url = format!("{}/meta", server.uri());
        let result = client.get(&url, "p", None, None).await;
        assert!(matches!(result, Err(FetchError::ArtifactTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_get_appends_query_params_and_records_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(wiremock::matchers::query_param("q", "reactor"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let client = live_client(&attempts);
        let mut params = BTreeMap::new();
        params.insert("q".to_string(), "reactor".to_string());
        let url = format!("{}/search", server.uri());
        let response = client.get(&url, "p", None, Some(&params)).await.unwrap();

        assert_eq!(response.params_json.as_deref(), Some(r#"{"q":"reactor"}"#));
        let attempts = attempts.lock().unwrap();
        assert!(attempts[0].url.contains("q=reactor"));
    }

    #[tokio::test]
    async fn test_post_sends_json_body_and_headers() {
        let server = MockServer::start().await;
        let body = serde_json::json!({"q": "reactor", "skip": 0});
        Mock::given(method("POST"))
            .and(path("/aps/api/search"))
            .and(header("content-type", "application/json"))
            .and(header("accept", "application/json"))
            .and(body_json(body.clone()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"results":[]}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let client = live_client(&attempts);
        let url = format!("{}/aps/api/search", server.uri());
        let response = client.post(&url, "p", None, Some(&body)).await.unwrap();

        assert_eq!(response.method, "POST");
        assert_eq!(response.header("content-type"), Some("application/json"));
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts[0].request_headers["content-type"], "application/json");
        assert!(attempts[0].request_payload.as_deref().unwrap().contains("reactor"));
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_mask_outcome() {
        let server = MockServer::start().await;
        mount_statuses(&server, "/meta", &[200]).await;

        let client = FetchClient::new(
            FetchConfig {
                retry_policy: fast_policy(),
                ..FetchConfig::live()
            },
            Arc::new(RateLimiter::new()),
        )
        .unwrap()
        .with_observer(Arc::new(|_: &Attempt| panic!("observer failure")));

        let url = format!("{}/meta", server.uri());
        let response = client.get(&url, "p", None, None).await.unwrap();
        assert_eq!(response.status_code, 200);
    }

    // ==================== Offline mode ====================

    #[tokio::test]
    async fn test_offline_get_reads_fixture_and_emits_one_attempt() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("prov")).unwrap();
        std::fs::write(temp_dir.path().join("prov/data.json"), br#"{"a":1}"#).unwrap();

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&attempts);
        let client = FetchClient::new(
            FetchConfig::offline(temp_dir.path()),
            Arc::new(RateLimiter::new()),
        )
        .unwrap()
        .with_observer(Arc::new(move |a: &Attempt| sink.lock().unwrap().push(a.clone())));

        let response = client
            .get("https://data.sec.gov/x.json", "prov", Some("data.json"), None)
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, br#"{"a":1}"#);
        assert_eq!(response.header("x-fixture"), Some("data.json"));
        assert_eq!(response.header("content-type"), Some("application/json"));
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_number, 1);
        assert!(attempts[0].error_kind.is_none());
        assert!(attempts[0].error_message.is_none());
    }

    #[tokio::test]
    async fn test_offline_missing_fixture_name_is_config_error() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&attempts);
        let client = FetchClient::new(
            FetchConfig::offline("/nonexistent/fixture/root"),
            Arc::new(RateLimiter::new()),
        )
        .unwrap()
        .with_observer(Arc::new(move |a: &Attempt| sink.lock().unwrap().push(a.clone())));

        let result = client.get("https://example.com", "prov", None, None).await;
        assert!(matches!(result, Err(FetchError::Config { .. })));
        let result = client.post("https://example.com", "prov", None, None).await;
        assert!(matches!(result, Err(FetchError::Config { .. })));
        assert!(attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_missing_fixture_file_is_fixture_error() {
        let temp_dir = TempDir::new().unwrap();
        let client = FetchClient::new(
            FetchConfig::offline(temp_dir.path()),
            Arc::new(RateLimiter::new()),
        )
        .unwrap();
        let result = client
            .get("https://example.com", "prov", Some("absent.json"), None)
            .await;
        assert!(matches!(result, Err(FetchError::Fixture { .. })));
    }

    #[test]
    fn test_header_list_joins_repeated_headers() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", "a=1".parse().unwrap());
        map.append("set-cookie", "b=2".parse().unwrap());
        let list = header_list(&map);
        assert_eq!(list["set-cookie"], "a=1, b=2");
    }
}
