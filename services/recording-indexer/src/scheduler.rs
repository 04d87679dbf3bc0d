use crate::scanner::{ScanSummary, Scanner};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// How a scan pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass walked the whole bucket
    Summarized(ScanSummary),
    /// The pass stopped at its first listing or store error
    Aborted,
}

/// Drives the scanner on a fixed interval until shutdown.
///
/// A failed pass is not retried early; the next tick is the only retry.
pub struct ScanScheduler {
    scanner: Arc<Scanner>,
    interval: Duration,
}

impl ScanScheduler {
    pub fn new(scanner: Arc<Scanner>, interval: Duration) -> Self {
        Self { scanner, interval }
    }

    /// Run passes until `shutdown` is cancelled. The first pass starts
    /// immediately; a pass still running at shutdown is dropped.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Scan scheduler started");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown during scan pass, abandoning it");
                    break;
                }
                _ = self.run_pass() => {}
            }
        }

        info!("Scan scheduler stopped");
    }

    /// Run a single pass and log how it ended
    pub async fn run_pass(&self) -> PassOutcome {
        debug!("Scan pass started");
        metrics::counter!("indexer.scan.passes").increment(1);

        match self.scanner.scan_once().await {
            Ok(summary) => PassOutcome::Summarized(summary),
            Err(e) => {
                error!(error = %e, "Scan pass aborted, retrying next tick");
                metrics::counter!("indexer.scan.aborted").increment(1);
                PassOutcome::Aborted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SegmentCatalog;
    use crate::indexer::SegmentIndexer;
    use crate::key_parser::{KeyParser, ParseTimezone};
    use crate::testing::{MemoryBucket, MemoryCatalog};

    fn scheduler(
        bucket: Arc<MemoryBucket>,
        catalog: Arc<MemoryCatalog>,
        every: Duration,
    ) -> ScanScheduler {
        let parser = KeyParser::new(Duration::from_secs(3600), ParseTimezone::Utc).unwrap();
        let catalog: Arc<dyn SegmentCatalog> = catalog;
        let indexer = Arc::new(SegmentIndexer::new(parser, catalog, Duration::from_secs(5)));
        let scanner = Arc::new(Scanner::new(
            "archive",
            bucket,
            indexer,
            Duration::from_secs(5),
            10,
        ));
        ScanScheduler::new(scanner, every)
    }

    #[tokio::test]
    async fn test_run_pass_outcomes() {
        let bucket = Arc::new(MemoryBucket::with_objects(
            10,
            &[("cam1_20240101_120000.mp4", 500), ("readme.txt", 1)],
        ));
        let catalog = Arc::new(MemoryCatalog::default());
        let scheduler = scheduler(bucket, catalog.clone(), Duration::from_secs(30));

        assert_eq!(
            scheduler.run_pass().await,
            PassOutcome::Summarized(ScanSummary {
                total: 2,
                upserts: 1,
                skipped: 1
            })
        );

        catalog.set_fail_writes(true);
        assert_eq!(scheduler.run_pass().await, PassOutcome::Aborted);

        // Next pass after recovery converges again
        catalog.set_fail_writes(false);
        assert!(matches!(scheduler.run_pass().await, PassOutcome::Summarized(_)));
        assert_eq!(catalog.rows().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scans_on_interval_until_shutdown() {
        let bucket = Arc::new(MemoryBucket::with_objects(
            10,
            &[("cam1_20240101_120000.mp4", 500)],
        ));
        let catalog = Arc::new(MemoryCatalog::default());
        let scheduler = Arc::new(scheduler(
            bucket.clone(),
            catalog.clone(),
            Duration::from_secs(30),
        ));
        let shutdown = CancellationToken::new();

        let handle = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(shutdown).await })
        };

        // First pass runs immediately
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(bucket.pages_served(), 1);
        assert_eq!(catalog.rows().len(), 1);

        // A segment whose push never arrived shows up within one interval
        bucket.put("cam1_20240101_130000.mp4", 700);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(bucket.pages_served(), 2);
        assert_eq!(catalog.rows().len(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_stalled_pass() {
        let bucket = Arc::new(MemoryBucket::with_objects(
            10,
            &[("cam1_20240101_120000.mp4", 500)],
        ));
        let catalog = Arc::new(MemoryCatalog::default());
        catalog.set_stall(true);
        let scheduler = Arc::new(scheduler(bucket, catalog.clone(), Duration::from_secs(30)));
        let shutdown = CancellationToken::new();

        let handle = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler should stop promptly")
            .unwrap();
        assert!(catalog.rows().is_empty());
    }
}
