//! Records produced by the fetch client: one [`Attempt`] per physical try and
//! one [`CapturedResponse`] per logical request.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Header map with lowercase names, ordered for stable serialization.
pub type HeaderList = BTreeMap<String, String>;

/// Callback invoked synchronously once per physical attempt.
pub type AttemptObserver = Arc<dyn Fn(&Attempt) + Send + Sync>;

/// One physical network try, or one offline fixture substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// HTTP method (`GET`, `POST`).
    pub method: String,
    /// Requested URL (including query string).
    pub url: String,
    /// Serialized request payload (query parameters or JSON body).
    pub request_payload: Option<String>,
    /// Headers sent with the request.
    pub request_headers: HeaderList,
    /// Response status, `0` when no response was received.
    pub status_code: u16,
    /// Response headers.
    pub response_headers: HeaderList,
    /// Response body; empty for transport failures and aborted transfers.
    pub body: Vec<u8>,
    /// 1-based attempt number within the logical request.
    pub attempt_number: u32,
    /// Error kind, when the attempt failed.
    pub error_kind: Option<String>,
    /// Error message, when the attempt failed.
    pub error_message: Option<String>,
}

impl Attempt {
    /// Whether the attempt ended in an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_kind.is_some()
    }
}

/// Final result of one logical `get`/`post`, after retries resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    /// HTTP method.
    pub method: String,
    /// Final URL after redirects.
    pub url: String,
    /// Serialized request parameters or JSON body.
    pub params_json: Option<String>,
    /// HTTP status.
    pub status_code: u16,
    /// Response headers.
    pub headers: HeaderList,
    /// Response body.
    pub body: Vec<u8>,
}

impl CapturedResponse {
    /// Response headers as a JSON object string.
    #[must_use]
    pub fn headers_json(&self) -> String {
        serde_json::to_string(&self.headers).unwrap_or_else(|_| "{}".to_string())
    }

    /// Value of a response header, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
