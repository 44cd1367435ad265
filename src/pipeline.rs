//! Drives one provider through plan, metadata, artifact download and
//! persistence.

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::capture::{ArtifactEntry, CaptureError, ParseErrorRecord};
use crate::fetch::{FetchClient, FetchError};
use crate::hashing::sha256_hex;
use crate::provider::{Provider, ProviderError};
use crate::storage::{BlobStore, Database, NewArtifact, StorageError};

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The fetch client could not be set up.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A provider step failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Row or blob persistence failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The capture directory could not be written.
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// What one pipeline pass produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineOutcome {
    /// Response rows inserted (metadata plus artifact responses).
    pub responses: u64,
    /// Artifact rows newly inserted; duplicates are not counted.
    pub artifacts: u64,
    pub parse_errors: Vec<ParseErrorRecord>,
    /// Every artifact downloaded this run, duplicates included.
    pub artifact_manifest: Vec<ArtifactEntry>,
}

/// Pipeline over a row store and a blob store.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    db: Database,
    blobs: BlobStore,
}

impl PipelineRunner {
    #[must_use]
    pub fn new(db: Database, blobs: BlobStore) -> Self {
        Self { db, blobs }
    }

    /// Processes up to `limit` planned items for `provider`.
    ///
    /// An item whose metadata cannot be interpreted is recorded as a parse
    /// error and skipped; the run continues.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on the first fetch or storage failure.
    #[instrument(skip(self, client), fields(provider = %provider))]
    pub async fn run(
        &self,
        provider: Provider,
        client: &FetchClient,
        limit: usize,
    ) -> Result<PipelineOutcome, PipelineError> {
        let plan = provider.plan(limit);
        info!(items = plan.len(), "starting pipeline");
        let mut outcome = PipelineOutcome::default();

        for (item_index, item) in plan.iter().enumerate() {
            let metadata = provider
                .fetch_metadata_item(client, item, item_index)
                .await?;
            let response_id = self
                .db
                .insert_response(provider.name(), &metadata.response)
                .await?;
            outcome.responses += 1;

            if let Some(message) = &metadata.parse_error {
                warn!(item_index, response_id, %message, "metadata parse error, skipping item");
                outcome.parse_errors.push(ParseErrorRecord {
                    provider: provider.name().to_string(),
                    item_index,
                    message: message.clone(),
                    response_id: Some(response_id),
                });
            }

            let Some((target, response)) = provider.download_artifact(client, &metadata).await?
            else {
                continue;
            };

            let artifact_response_id = self.db.insert_response(provider.name(), &response).await?;
            outcome.responses += 1;

            let digest = sha256_hex(&response.body);
            let blob_path = self.blobs.put(&digest, &response.body).await?;
            let blob_path = blob_path.display().to_string();

            let inserted = self
                .db
                .insert_artifact(&NewArtifact {
                    provider: provider.name(),
                    source_url: &target.url,
                    sha256: &digest,
                    byte_count: response.body.len() as u64,
                    blob_path: &blob_path,
                    response_id: Some(artifact_response_id),
                })
                .await?;
            if inserted {
                outcome.artifacts += 1;
            }
            info!(item_index, url = %target.url, sha256 = %digest, inserted, "artifact stored");

            outcome.artifact_manifest.push(ArtifactEntry {
                source_url: target.url,
                sha256: digest,
                blob_path,
            });
        }

        provider.checkpoint();
        info!(
            responses = outcome.responses,
            artifacts = outcome.artifacts,
            parse_errors = outcome.parse_errors.len(),
            "pipeline complete"
        );
        Ok(outcome)
    }
}
