use crate::catalog::{Recording, SegmentCatalog};
use crate::error::IndexerError;
use crate::key_parser::{KeyParser, ParsedKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::instrument;

/// What happened to one observed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The key named a segment and its row was upserted
    Indexed(Recording),
    /// The key named something else and was left alone
    Skipped,
}

/// Parse-then-upsert, shared by the scanner and the push endpoint.
///
/// Neither path coordinates with the other beyond the catalog's atomic upsert.
/// Both derive identical rows from the same key, so racing observations
/// converge.
pub struct SegmentIndexer {
    parser: KeyParser,
    catalog: Arc<dyn SegmentCatalog>,
    upsert_timeout: Duration,
}

impl SegmentIndexer {
    pub fn new(
        parser: KeyParser,
        catalog: Arc<dyn SegmentCatalog>,
        upsert_timeout: Duration,
    ) -> Self {
        Self {
            parser,
            catalog,
            upsert_timeout,
        }
    }

    /// Index an object observed by the scanner. Unrecognized keys are skipped.
    pub async fn apply(&self, key: &str, size_bytes: i64) -> Result<IndexOutcome, IndexerError> {
        let ParsedKey::Recognized {
            camera_id,
            started_at,
            ended_at,
        } = self.parser.parse(key)
        else {
            return Ok(IndexOutcome::Skipped);
        };

        let recording = Recording {
            camera_id,
            started_at,
            ended_at,
            s3_key: key.to_string(),
            size_bytes,
        };

        self.upsert(&recording).await?;

        Ok(IndexOutcome::Indexed(recording))
    }

    /// Index an object announced by its writer. Unrecognized keys are an error.
    #[instrument(skip(self))]
    pub async fn ingest(&self, key: &str, size_bytes: i64) -> Result<Recording, IndexerError> {
        match self.apply(key, size_bytes).await? {
            IndexOutcome::Indexed(recording) => Ok(recording),
            IndexOutcome::Skipped => Err(IndexerError::UnrecognizedKey(key.to_string())),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn SegmentCatalog> {
        &self.catalog
    }

    async fn upsert(&self, recording: &Recording) -> Result<(), IndexerError> {
        timeout(self.upsert_timeout, self.catalog.upsert(recording))
            .await
            .map_err(|_| IndexerError::Store {
                s3_key: recording.s3_key.clone(),
                reason: format!("timed out after {}s", self.upsert_timeout.as_secs()),
            })?
    }
}
