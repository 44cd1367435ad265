//! SEC EDGAR: company submissions JSON, then the primary document of the
//! most recent filing.

use serde_json::Value;

use super::{ArtifactTarget, MetadataItem, PlanItem, ProviderError};
use crate::fetch::FetchClient;

const NAME: &str = "sec_edgar";

/// Filers planned by default (Apple Inc.).
pub const DEFAULT_CIKS: &[&str] = &["0000320193"];

pub(super) fn plan() -> Vec<PlanItem> {
    DEFAULT_CIKS
        .iter()
        .map(|cik| PlanItem::Filer {
            cik10: (*cik).to_string(),
        })
        .collect()
}

/// Submissions endpoint for a 10-digit CIK.
#[must_use]
pub fn submissions_url(cik10: &str) -> String {
    format!("https://data.sec.gov/submissions/CIK{cik10}.json")
}

/// Archive URL of the primary document of the newest filing in a
/// submissions payload.
///
/// # Errors
///
/// Returns a description of the first missing or malformed field.
pub fn archive_document_url(cik10: &str, submissions: &Value) -> Result<String, String> {
    let recent = submissions
        .pointer("/filings/recent")
        .ok_or("submissions payload missing 'filings.recent'")?;
    let accession = recent
        .pointer("/accessionNumber/0")
        .and_then(Value::as_str)
        .ok_or("submissions payload missing 'filings.recent.accessionNumber[0]'")?;
    let document = recent
        .pointer("/primaryDocument/0")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .ok_or("submissions payload missing 'filings.recent.primaryDocument[0]'")?;
    let cik: u64 = cik10
        .parse()
        .map_err(|_| format!("CIK '{cik10}' is not numeric"))?;

    Ok(format!(
        "https://www.sec.gov/Archives/edgar/data/{cik}/{}/{document}",
        accession.replace('-', "")
    ))
}

pub(super) async fn fetch_metadata(
    client: &FetchClient,
    item: &PlanItem,
) -> Result<MetadataItem, ProviderError> {
    let PlanItem::Filer { cik10 } = item else {
        return Err(ProviderError::InvalidItem {
            provider: NAME,
            item: item.clone(),
        });
    };

    let response = client
        .get(&submissions_url(cik10), NAME, Some("submissions.json"), None)
        .await?;

    let target = serde_json::from_slice::<Value>(&response.body)
        .map_err(|e| format!("submissions body is not JSON: {e}"))
        .and_then(|payload| archive_document_url(cik10, &payload))
        .map(|url| ArtifactTarget {
            url,
            fixture_name: "artifact.htm".to_string(),
        });
    Ok(MetadataItem::parsed(response, target))
}
