//! Ingestion coordinator: one cycle across all source adapters
//!
//! The cycle has two phases. The fetch phase runs every enabled adapter
//! concurrently (each under a total timeout) and never touches the store.
//! The write phase then normalizes, extracts entities, and upserts each
//! adapter's batch in one transaction. Per-record failures are logged and
//! counted; an adapter failure skips that adapter; only storage failures
//! surface.

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::features::FeatureExtractor;
use crate::normalize::Normalizer;
use crate::sources::{FetchBatch, SourceAdapter};
use crate::store::Store;
use futures::future::join_all;
use std::time::{Duration, Instant};

/// Outcome of one adapter within a cycle.
#[derive(Debug)]
pub struct SourceReport {
    pub name: &'static str,
    pub enabled: bool,
    pub fetched: usize,
    pub ingested: usize,
    /// Records dropped by quality gates (expected, not errors)
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Outcome of one full ingestion cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub sources: Vec<SourceReport>,
    pub duration: Duration,
}

impl CycleReport {
    pub fn total_ingested(&self) -> usize {
        self.sources.iter().map(|s| s.ingested).sum()
    }

    /// True when any source or record failed; the cycle still completed.
    pub fn has_errors(&self) -> bool {
        self.sources.iter().any(|s| !s.errors.is_empty())
    }
}

pub struct IngestCoordinator<'a> {
    store: &'a Store,
    adapters: Vec<Box<dyn SourceAdapter>>,
    normalizer: Normalizer,
    extractor: FeatureExtractor,
    limit_per_source: usize,
    adapter_timeout: Duration,
}

impl<'a> IngestCoordinator<'a> {
    pub fn new(
        store: &'a Store,
        adapters: Vec<Box<dyn SourceAdapter>>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            store,
            adapters,
            normalizer: Normalizer::new(),
            extractor: FeatureExtractor::new(),
            limit_per_source: config.limit_per_source,
            adapter_timeout: Duration::from_secs(config.adapter_timeout_secs),
        }
    }

    /// Run one ingestion cycle. Returns `Err` only on storage failure;
    /// source and record trouble is contained in the report.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let start = Instant::now();

        // Fetch phase: concurrent, store untouched. Each adapter gets a
        // total timeout; exceeding it abandons that adapter's batch.
        let fetches = join_all(self.adapters.iter().map(|adapter| async move {
            if !adapter.enabled() {
                return None;
            }
            Some(
                tokio::time::timeout(
                    self.adapter_timeout,
                    adapter.fetch_batch(None, self.limit_per_source),
                )
                .await,
            )
        }))
        .await;

        // Write phase: serial, one transaction per adapter batch
        let mut sources = Vec::with_capacity(self.adapters.len());
        for (adapter, fetch) in self.adapters.iter().zip(fetches) {
            let report = match fetch {
                None => {
                    tracing::info!(source = adapter.name(), "Adapter disabled, skipping");
                    SourceReport {
                        name: adapter.name(),
                        enabled: false,
                        fetched: 0,
                        ingested: 0,
                        skipped: 0,
                        errors: Vec::new(),
                    }
                }
                Some(Err(_elapsed)) => {
                    tracing::warn!(
                        source = adapter.name(),
                        timeout_secs = self.adapter_timeout.as_secs(),
                        "Adapter timed out, batch abandoned"
                    );
                    SourceReport {
                        name: adapter.name(),
                        enabled: true,
                        fetched: 0,
                        ingested: 0,
                        skipped: 0,
                        errors: vec![format!(
                            "timed out after {}s",
                            self.adapter_timeout.as_secs()
                        )],
                    }
                }
                Some(Ok(Err(e))) => {
                    tracing::warn!(source = adapter.name(), "Adapter failed: {e}");
                    SourceReport {
                        name: adapter.name(),
                        enabled: true,
                        fetched: 0,
                        ingested: 0,
                        skipped: 0,
                        errors: vec![e.to_string()],
                    }
                }
                Some(Ok(Ok(batch))) => self.ingest_batch(adapter.as_ref(), batch)?,
            };
            sources.push(report);
        }

        let report = CycleReport {
            sources,
            duration: start.elapsed(),
        };
        tracing::info!(
            ingested = report.total_ingested(),
            duration_ms = report.duration.as_millis() as u64,
            errors = report.has_errors(),
            "Ingestion cycle complete"
        );
        Ok(report)
    }

    fn ingest_batch(&self, adapter: &dyn SourceAdapter, batch: FetchBatch) -> Result<SourceReport> {
        let mut report = SourceReport {
            name: adapter.name(),
            enabled: true,
            fetched: batch.records.len(),
            ingested: 0,
            skipped: 0,
            errors: Vec::new(),
        };

        if batch.next_cursor.is_some() {
            // Bounded cycle: anything beyond the limit waits for the next run
            tracing::debug!(source = adapter.name(), "Source has more records than the batch limit");
        }

        let mut posts = Vec::with_capacity(batch.records.len());
        for record in &batch.records {
            match self.normalizer.normalize(adapter.kind(), record) {
                Ok(Some(mut post)) => {
                    post.entities = self.extractor.extract_entities(&post.text);
                    posts.push(post);
                }
                Ok(None) => {
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(source = adapter.name(), "Record rejected: {e}");
                    report.errors.push(e.to_string());
                }
            }
        }

        match self.store.upsert_posts(&posts) {
            Ok(written) => report.ingested = written,
            // Storage loss is the one failure that must surface
            Err(e @ Error::Storage(_)) => return Err(e),
            Err(e) => report.errors.push(e.to_string()),
        }

        tracing::info!(
            source = adapter.name(),
            fetched = report.fetched,
            ingested = report.ingested,
            skipped = report.skipped,
            "Source batch ingested"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::SourceKind;
    use crate::sources::RawRecord;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::TempDir;

    struct MockAdapter {
        records: Vec<RawRecord>,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SourceAdapter for MockAdapter {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Feed
        }

        fn enabled(&self) -> bool {
            true
        }

        async fn fetch_batch(
            &self,
            _cursor: Option<String>,
            limit: usize,
        ) -> crate::error::Result<FetchBatch> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(Error::Source("mock adapter down".into()));
            }
            Ok(FetchBatch {
                records: self.records.iter().take(limit).cloned().collect(),
                next_cursor: None,
            })
        }
    }

    fn feed_record(n: usize) -> RawRecord {
        RawRecord {
            local_id: Some(format!("entry-{n}")),
            title: format!("Headline number {n} with enough text"),
            body: "Summary body for the entry".to_string(),
            author: None,
            url: Some(format!("https://example.com/{n}")),
            published: Some(Utc::now() - ChronoDuration::hours(1)),
        }
    }

    /// A record with no identity and no way to derive one
    fn malformed_record() -> RawRecord {
        RawRecord {
            local_id: None,
            title: "Malformed but wordy enough to pass the length gate".to_string(),
            body: String::new(),
            author: None,
            url: None,
            published: None,
        }
    }

    fn test_ingest_config() -> IngestConfig {
        IngestConfig {
            limit_per_source: 100,
            adapter_timeout_secs: 60,
        }
    }

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("ingest.db")).unwrap();
        (dir, store)
    }

    fn coordinator_with<'a>(
        store: &'a Store,
        adapters: Vec<Box<dyn SourceAdapter>>,
        config: &IngestConfig,
    ) -> IngestCoordinator<'a> {
        IngestCoordinator::new(store, adapters, config)
    }

    #[tokio::test]
    async fn test_cycle_ingests_batch() {
        let (_dir, store) = open_store();
        let adapter = MockAdapter {
            records: (0..10).map(feed_record).collect(),
            fail: false,
            delay: None,
        };
        let coordinator = coordinator_with(&store, vec![Box::new(adapter)], &test_ingest_config());
        let report = coordinator.run_cycle().await.unwrap();
        assert_eq!(report.total_ingested(), 10);
        assert!(!report.has_errors());
        let (total, with_entities) = store.post_counts().unwrap();
        assert_eq!(total, 10);
        assert!(with_entities > 0);
    }

    #[tokio::test]
    async fn test_reingestion_is_idempotent() {
        let (_dir, store) = open_store();
        let records: Vec<RawRecord> = (0..50).map(feed_record).collect();
        let config = test_ingest_config();
        for _ in 0..3 {
            let adapter = MockAdapter {
                records: records.clone(),
                fail: false,
                delay: None,
            };
            let coordinator = coordinator_with(&store, vec![Box::new(adapter)], &config);
            coordinator.run_cycle().await.unwrap();
        }
        let (total, _) = store.post_counts().unwrap();
        assert_eq!(total, 50);
    }

    #[tokio::test]
    async fn test_malformed_record_skips_only_itself() {
        let (_dir, store) = open_store();
        let mut records: Vec<RawRecord> = (0..9).map(feed_record).collect();
        records.insert(3, malformed_record());
        let adapter = MockAdapter {
            records,
            fail: false,
            delay: None,
        };
        let coordinator = coordinator_with(&store, vec![Box::new(adapter)], &test_ingest_config());
        let report = coordinator.run_cycle().await.unwrap();
        assert_eq!(report.total_ingested(), 9);
        assert!(report.has_errors());
        assert_eq!(report.sources[0].errors.len(), 1);
        let (total, _) = store.post_counts().unwrap();
        assert_eq!(total, 9);
    }

    #[tokio::test]
    async fn test_too_short_record_is_skipped_without_error() {
        let (_dir, store) = open_store();
        let mut short = feed_record(0);
        short.title = "hi".to_string();
        short.body = String::new();
        let adapter = MockAdapter {
            records: vec![short, feed_record(1)],
            fail: false,
            delay: None,
        };
        let coordinator = coordinator_with(&store, vec![Box::new(adapter)], &test_ingest_config());
        let report = coordinator.run_cycle().await.unwrap();
        assert_eq!(report.total_ingested(), 1);
        assert_eq!(report.sources[0].skipped, 1);
        assert!(!report.has_errors());
    }

    #[tokio::test]
    async fn test_failing_adapter_does_not_abort_cycle() {
        let (_dir, store) = open_store();
        let broken = MockAdapter {
            records: Vec::new(),
            fail: true,
            delay: None,
        };
        let healthy = MockAdapter {
            records: (0..5).map(feed_record).collect(),
            fail: false,
            delay: None,
        };
        let coordinator = coordinator_with(
            &store,
            vec![Box::new(broken), Box::new(healthy)],
            &test_ingest_config(),
        );
        let report = coordinator.run_cycle().await.unwrap();
        assert_eq!(report.total_ingested(), 5);
        assert!(report.has_errors());
    }

    #[tokio::test]
    async fn test_slow_adapter_times_out() {
        let (_dir, store) = open_store();
        let slow = MockAdapter {
            records: (0..5).map(feed_record).collect(),
            fail: false,
            delay: Some(Duration::from_millis(500)),
        };
        let config = IngestConfig {
            limit_per_source: 100,
            adapter_timeout_secs: 0,
        };
        let coordinator = coordinator_with(&store, vec![Box::new(slow)], &config);
        let report = coordinator.run_cycle().await.unwrap();
        assert_eq!(report.total_ingested(), 0);
        assert!(report.has_errors());
        assert!(report.sources[0].errors[0].contains("timed out"));
    }
}
