//! NRC ADAMS Public Search: POST a full-text search, download the first hit.

use serde_json::{Value, json};

use super::{ArtifactTarget, MetadataItem, PlanItem, ProviderError, body_preview};
use crate::fetch::FetchClient;

const NAME: &str = "nrc_adams_aps";

/// APS search endpoint behind the subscription-key gateway.
pub const APS_SEARCH_URL: &str = "https://adams-api.nrc.gov/aps/api/search";

const DEFAULT_QUERY: &str = "reactor";
const PREVIEW_BYTES: usize = 1200;

pub(super) fn plan() -> Vec<PlanItem> {
    vec![PlanItem::Search {
        query: DEFAULT_QUERY.to_string(),
    }]
}

fn search_body(query: &str) -> Value {
    json!({
        "q": query,
        "filters": [],
        "anyFilters": [],
        "legacyLibFilter": true,
        "mainLibFilter": true,
        "sort": "",
        "sortDirection": 1,
        "skip": 0,
    })
}

/// URL of the first document in an APS search payload.
///
/// Accepts `results` or `Results`, and within the first result looks at
/// `pdfUrl`/`PdfUrl`, then `document.Url` (either casing), then `Url`/`url`.
///
/// # Errors
///
/// Returns a description of what was missing.
pub fn extract_document_url(payload: &Value) -> Result<String, String> {
    let results = payload
        .get("results")
        .or_else(|| payload.get("Results"))
        .and_then(Value::as_array)
        .filter(|r| !r.is_empty())
        .ok_or("APS payload missing non-empty 'results' list")?;
    let first = results[0]
        .as_object()
        .ok_or("APS payload 'results[0]' is not an object")?;

    let non_empty_str = |value: Option<&Value>| {
        value
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(url) = non_empty_str(first.get("pdfUrl").or_else(|| first.get("PdfUrl"))) {
        return Ok(url);
    }
    if let Some(document) = first
        .get("document")
        .or_else(|| first.get("Document"))
        .and_then(Value::as_object)
        && let Some(url) = non_empty_str(document.get("Url").or_else(|| document.get("url")))
    {
        return Ok(url);
    }
    non_empty_str(first.get("Url").or_else(|| first.get("url")))
        .ok_or_else(|| "could not locate a document URL in the first APS result".to_string())
}

pub(super) async fn fetch_metadata(
    client: &FetchClient,
    item: &PlanItem,
) -> Result<MetadataItem, ProviderError> {
    let PlanItem::Search { query } = item else {
        return Err(ProviderError::InvalidItem {
            provider: NAME,
            item: item.clone(),
        });
    };

    let body = search_body(query);
    let response = client
        .post(APS_SEARCH_URL, NAME, Some("search.json"), Some(&body))
        .await?;

    if response.status_code != 200 {
        return Err(ProviderError::UnexpectedStatus {
            provider: NAME,
            status: response.status_code,
            url: response.url.clone(),
            preview: body_preview(&response.body, PREVIEW_BYTES),
        });
    }

    let target = serde_json::from_slice::<Value>(&response.body)
        .map_err(|e| format!("APS search body is not JSON: {e}"))
        .and_then(|payload| extract_document_url(&payload))
        .map(|url| ArtifactTarget {
            url,
            fixture_name: "document.pdf".to_string(),
        });
    Ok(MetadataItem::parsed(response, target))
}
