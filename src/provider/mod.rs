//! Data-source plug-ins sharing one contract: plan, fetch metadata, download
//! the referenced artifact, checkpoint.
//!
//! The set is closed, so it is a plain enum dispatching to one module per
//! source rather than a trait object.

mod nrc_adams_aps;
mod sec_edgar;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::fetch::{CapturedResponse, FetchClient, FetchError};

pub use nrc_adams_aps::{APS_SEARCH_URL, extract_document_url};
pub use sec_edgar::{DEFAULT_CIKS, archive_document_url, submissions_url};

/// Errors a provider step can raise.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The underlying fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A required response came back with a status the provider cannot use.
    #[error("{provider} request failed: status={status} url={url} body_preview={preview}")]
    UnexpectedStatus {
        provider: &'static str,
        status: u16,
        url: String,
        preview: String,
    },

    /// A plan item built for another provider.
    #[error("{provider} cannot process plan item {item:?}")]
    InvalidItem {
        provider: &'static str,
        item: PlanItem,
    },
}

/// Unknown provider name.
#[derive(Debug, Clone, Error)]
#[error("unknown provider '{0}' (expected one of: sec_edgar, nrc_adams_aps)")]
pub struct UnknownProvider(pub String);

/// One unit of planned work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanItem {
    /// An SEC filer, identified by zero-padded 10-digit CIK.
    Filer { cik10: String },
    /// An APS full-text search query.
    Search { query: String },
}

/// A document referenced by a metadata response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTarget {
    pub url: String,
    /// Fixture standing in for the document offline.
    pub fixture_name: String,
}

/// Result of fetching one item's metadata.
#[derive(Debug, Clone)]
pub struct MetadataItem {
    pub response: CapturedResponse,
    /// Present when the response named a document.
    pub artifact: Option<ArtifactTarget>,
    /// Present when the response could not be interpreted.
    pub parse_error: Option<String>,
}

impl MetadataItem {
    fn parsed(response: CapturedResponse, result: Result<ArtifactTarget, String>) -> Self {
        match result {
            Ok(target) => Self {
                response,
                artifact: Some(target),
                parse_error: None,
            },
            Err(message) => Self {
                response,
                artifact: None,
                parse_error: Some(message),
            },
        }
    }
}

/// Supported data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// SEC EDGAR submissions and filing archives.
    SecEdgar,
    /// NRC ADAMS Public Search (APS) API.
    NrcAdamsAps,
}

impl Provider {
    /// Every provider.
    pub const ALL: [Self; 2] = [Self::SecEdgar, Self::NrcAdamsAps];

    /// Stable name, used in fixture paths, storage rows and run labels.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SecEdgar => "sec_edgar",
            Self::NrcAdamsAps => "nrc_adams_aps",
        }
    }

    /// Looks a provider up by name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name.trim())
    }

    /// Work items for one run; always at least one, at most `limit`.
    #[must_use]
    pub fn plan(self, limit: usize) -> Vec<PlanItem> {
        let items: Vec<PlanItem> = match self {
            Self::SecEdgar => sec_edgar::plan(),
            Self::NrcAdamsAps => nrc_adams_aps::plan(),
        };
        items.into_iter().take(limit.max(1)).collect()
    }

    /// Fetches the metadata response for `item`.
    ///
    /// Body shapes the provider does not understand become a parse error on
    /// the returned item instead of an `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the fetch fails or the status is unusable.
    #[instrument(skip(self, client), fields(provider = self.name()))]
    pub async fn fetch_metadata_item(
        self,
        client: &FetchClient,
        item: &PlanItem,
        item_index: usize,
    ) -> Result<MetadataItem, ProviderError> {
        debug!(item_index, "fetching metadata");
        match self {
            Self::SecEdgar => sec_edgar::fetch_metadata(client, item).await,
            Self::NrcAdamsAps => nrc_adams_aps::fetch_metadata(client, item).await,
        }
    }

    /// Downloads the artifact named by `metadata`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fetch`] if the download fails.
    #[instrument(skip(self, client, metadata), fields(provider = self.name()))]
    pub async fn download_artifact(
        self,
        client: &FetchClient,
        metadata: &MetadataItem,
    ) -> Result<Option<(ArtifactTarget, CapturedResponse)>, ProviderError> {
        let Some(target) = &metadata.artifact else {
            return Ok(None);
        };
        let response = client
            .get(&target.url, self.name(), Some(&target.fixture_name), None)
            .await?;
        Ok(Some((target.clone(), response)))
    }

    /// Persists resumable progress. Neither source keeps a cursor yet.
    pub fn checkpoint(self) {
        debug!(provider = self.name(), "checkpoint");
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

/// First `max` bytes of a body as lossy UTF-8, for error messages.
fn body_preview(body: &[u8], max: usize) -> String {
    String::from_utf8_lossy(&body[..body.len().min(max)]).into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_names_round_trip() {
        for provider in Provider::ALL {
            assert_eq!(Provider::parse(provider.name()), Some(provider));
            assert_eq!(provider.to_string().parse::<Provider>().unwrap(), provider);
        }
        assert!("edgar".parse::<Provider>().is_err());
    }

    #[test]
    fn test_plan_has_at_least_one_item() {
        assert_eq!(Provider::SecEdgar.plan(0).len(), 1);
        assert_eq!(
            Provider::SecEdgar.plan(1),
            vec![PlanItem::Filer {
                cik10: "0000320193".to_string()
            }]
        );
        assert!(matches!(
            Provider::NrcAdamsAps.plan(5)[0],
            PlanItem::Search { .. }
        ));
    }

    #[test]
    fn test_body_preview_truncates() {
        assert_eq!(body_preview(b"abcdef", 3), "abc");
        assert_eq!(body_preview(b"ab", 10), "ab");
    }
}
