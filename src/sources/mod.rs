//! Source adapters: bounded fetches of recent items from public sources
//!
//! Each adapter turns a remote listing into [`RawRecord`]s and hands them to
//! the normalizer. The contract every adapter honors: a record's stable
//! identity must be derivable *before* it reaches the store, so upserts stay
//! idempotent across retries.

use crate::config::Config;
use crate::error::Result;
use crate::post::SourceKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

mod feeds;
mod reddit;

pub use feeds::{default_feed_urls, FeedAdapter};
pub use reddit::{default_topics, RedditAdapter};

/// One source-specific record, before normalization.
///
/// `title` and `body` are carried verbatim; the normalizer joins and cleans
/// them. `local_id` is the adapter's stable handle when the source provides
/// one (discussion-site submission id); syndication entries may rely on
/// `url` + `published` instead.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub local_id: Option<String>,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub url: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// Result of one bounded fetch.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub records: Vec<RawRecord>,
    /// Opaque continuation handle for incremental paging, when the source
    /// supports it. `None` means the batch is complete.
    pub next_cursor: Option<String>,
}

/// A rate-limited, bounded source of recent items.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Short name for logs and cycle reports.
    fn name(&self) -> &'static str;

    fn kind(&self) -> SourceKind;

    /// Whether the adapter can run. Missing credentials disable an adapter
    /// but never abort the pipeline.
    fn enabled(&self) -> bool;

    /// Fetch at most `limit` recent records, resuming from `cursor` if the
    /// previous batch returned one.
    async fn fetch_batch(&self, cursor: Option<String>, limit: usize) -> Result<FetchBatch>;
}

/// Build every adapter the configuration enables, disabled ones included
/// (the coordinator logs and skips them).
pub fn build_adapters(config: &Config) -> Vec<Box<dyn SourceAdapter>> {
    vec![
        Box::new(RedditAdapter::new(&config.reddit)),
        Box::new(FeedAdapter::new(&config.feeds)),
    ]
}
