use crate::error::IndexerError;
use crate::indexer::{IndexOutcome, SegmentIndexer};
use crate::object_store::{ObjectLister, ObjectPage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

/// Counters for one scan pass. `total == upserts + skipped` for a finished pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub total: u64,
    pub upserts: u64,
    pub skipped: u64,
}

/// Full-bucket reconciliation pass.
///
/// Every object is re-parsed and re-upserted on every pass, so a segment whose
/// push notification was lost is indexed within one scan interval. Pages are
/// fetched and processed strictly one after another.
pub struct Scanner {
    bucket: String,
    lister: Arc<dyn ObjectLister>,
    indexer: Arc<SegmentIndexer>,
    page_timeout: Duration,
    unrecognized_log_limit: u64,
}

impl Scanner {
    pub fn new(
        bucket: impl Into<String>,
        lister: Arc<dyn ObjectLister>,
        indexer: Arc<SegmentIndexer>,
        page_timeout: Duration,
        unrecognized_log_limit: u64,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            lister,
            indexer,
            page_timeout,
            unrecognized_log_limit,
        }
    }

    /// Run one pass over the whole bucket.
    ///
    /// The first listing or store error aborts the pass. Nothing is lost: the
    /// next pass re-derives everything from the keys.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn scan_once(&self) -> Result<ScanSummary, IndexerError> {
        let mut summary = ScanSummary::default();
        let mut continuation_token: Option<String> = None;

        loop {
            let page = self.fetch_page(continuation_token.take()).await?;

            for object in &page.objects {
                summary.total += 1;

                match self.indexer.apply(&object.key, object.size_bytes).await? {
                    IndexOutcome::Indexed(_) => summary.upserts += 1,
                    IndexOutcome::Skipped => {
                        summary.skipped += 1;
                        if summary.skipped <= self.unrecognized_log_limit {
                            info!(key = %object.key, "Skipping unrecognized key");
                        }
                    }
                }
            }

            match page.next_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        info!(
            total = summary.total,
            upserts = summary.upserts,
            skipped = summary.skipped,
            "Scan summary"
        );

        metrics::counter!("indexer.scan.objects").increment(summary.total);
        metrics::counter!("indexer.scan.upserts").increment(summary.upserts);
        metrics::counter!("indexer.scan.skipped").increment(summary.skipped);

        Ok(summary)
    }

    async fn fetch_page(
        &self,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage, IndexerError> {
        debug!(continuation = continuation_token.is_some(), "Fetching listing page");

        timeout(self.page_timeout, self.lister.list_page(continuation_token))
            .await
            .map_err(|_| IndexerError::Listing {
                bucket: self.bucket.clone(),
                reason: format!("page fetch timed out after {}s", self.page_timeout.as_secs()),
            })?
    }
}
