//! Client identifier sent with every live request.
//!
//! Single source for project URL and UA format so every host sees the same
//! identification unless a host family mandates its own string.

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/harvest";

/// Default User-Agent for fetch requests (identifies the tool).
#[must_use]
pub(crate) fn client_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("harvest/{version} (api-archiving-tool; +{PROJECT_UA_URL})")
}
