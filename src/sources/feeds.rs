//! Syndication-feed adapter
//!
//! Reads a configured list of feed URLs (RSS and Atom both parse through
//! feed-rs), caps the entries taken from each feed, and sleeps a second
//! between feeds. A malformed feed logs a warning and the sweep continues.

use super::{FetchBatch, RawRecord, SourceAdapter};
use crate::config::FeedsConfig;
use crate::error::{Error, Result};
use crate::post::SourceKind;
use async_trait::async_trait;
use std::time::Duration;

/// Pause between feeds
const FEED_PACING: Duration = Duration::from_secs(1);

pub struct FeedAdapter {
    client: reqwest::Client,
    urls: Vec<String>,
    max_entries_per_feed: usize,
}

impl FeedAdapter {
    pub fn new(config: &FeedsConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("trendlens/0.2")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            urls: config.urls.clone(),
            max_entries_per_feed: config.max_entries_per_feed,
        }
    }

    /// Fetch and parse one feed, yielding at most `max_entries_per_feed`
    /// records.
    async fn fetch_feed(&self, url: &str) -> Result<Vec<RawRecord>> {
        let body = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Source(format!("feed {url} request failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Source(format!("feed {url} request rejected: {e}")))?
            .bytes()
            .await
            .map_err(|e| Error::Source(format!("feed {url} body unreadable: {e}")))?;

        let feed = feed_rs::parser::parse(&body[..])
            .map_err(|e| Error::Source(format!("feed {url} unparseable: {e}")))?;

        let records = feed
            .entries
            .into_iter()
            .take(self.max_entries_per_feed)
            .map(entry_to_record)
            .collect();

        Ok(records)
    }
}

fn entry_to_record(entry: feed_rs::model::Entry) -> RawRecord {
    let link = best_link(&entry.links);
    let published = entry.published.or(entry.updated);

    RawRecord {
        local_id: (!entry.id.is_empty()).then(|| entry.id.clone()),
        title: entry.title.map(|t| t.content).unwrap_or_default(),
        body: entry.summary.map(|t| t.content).unwrap_or_default(),
        author: entry.authors.first().map(|p| p.name.clone()),
        url: link,
        published,
    }
}

/// Prefer a link with rel="alternate" (or no rel, which means the same);
/// fall back to the first link.
fn best_link(links: &[feed_rs::model::Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), Some("alternate") | None))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn name(&self) -> &'static str {
        "feed"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    fn enabled(&self) -> bool {
        !self.urls.is_empty()
    }

    async fn fetch_batch(&self, _cursor: Option<String>, limit: usize) -> Result<FetchBatch> {
        let mut records = Vec::new();

        for (i, url) in self.urls.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(FEED_PACING).await;
            }
            match self.fetch_feed(url).await {
                Ok(mut feed_records) => {
                    tracing::debug!(feed = %url, count = feed_records.len(), "Fetched feed");
                    records.append(&mut feed_records);
                }
                Err(e) => {
                    tracing::warn!(feed = %url, "Feed fetch failed: {e}");
                }
            }
            if records.len() >= limit {
                records.truncate(limit);
                break;
            }
        }

        Ok(FetchBatch {
            records,
            next_cursor: None,
        })
    }
}

/// Built-in feed list used when `RSS_FEEDS` is empty.
pub fn default_feed_urls() -> Vec<String> {
    [
        "https://www.reddit.com/r/news/.rss",
        "https://www.reddit.com/r/technology/.rss",
        "https://www.reddit.com/r/worldnews/.rss",
        "https://feeds.bbci.co.uk/news/rss.xml",
        "https://techcrunch.com/feed/",
        "https://www.wired.com/feed/rss",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>https://example.com</link>
    <description>Test feed</description>
    <item>
      <title>First headline of the day</title>
      <link>https://example.com/a</link>
      <description>Summary of the first story</description>
      <guid>https://example.com/a</guid>
      <pubDate>Wed, 01 May 2024 12:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second headline of the day</title>
      <link>https://example.com/b</link>
      <description>Summary of the second story</description>
      <guid>https://example.com/b</guid>
      <pubDate>Wed, 01 May 2024 13:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_entry_mapping_from_rss() {
        let feed = feed_rs::parser::parse(RSS_SAMPLE.as_bytes()).unwrap();
        assert_eq!(feed.entries.len(), 2);
        let record = entry_to_record(feed.entries.into_iter().next().unwrap());
        assert_eq!(record.title, "First headline of the day");
        assert_eq!(record.body, "Summary of the first story");
        assert_eq!(record.url.as_deref(), Some("https://example.com/a"));
        assert!(record.published.is_some());
        assert!(record.local_id.is_some());
    }

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Atom</title>
  <id>urn:example:feed</id>
  <updated>2024-05-01T12:00:00Z</updated>
  <entry>
    <title>Atom entry headline</title>
    <id>urn:example:entry:1</id>
    <updated>2024-05-01T12:00:00Z</updated>
    <link rel="related" href="https://example.com/comments"/>
    <link rel="alternate" href="https://example.com/story"/>
    <summary>Entry summary text</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_best_link_prefers_alternate() {
        let feed = feed_rs::parser::parse(ATOM_SAMPLE.as_bytes()).unwrap();
        let entry = feed.entries.into_iter().next().unwrap();
        assert_eq!(
            best_link(&entry.links).as_deref(),
            Some("https://example.com/story")
        );
    }

    #[test]
    fn test_adapter_enabled_by_feed_list() {
        let with = FeedAdapter::new(&FeedsConfig {
            urls: default_feed_urls(),
            max_entries_per_feed: 50,
        });
        let without = FeedAdapter::new(&FeedsConfig {
            urls: Vec::new(),
            max_entries_per_feed: 50,
        });
        assert!(with.enabled());
        assert!(!without.enabled());
    }
}
