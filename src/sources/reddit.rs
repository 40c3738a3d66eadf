//! Discussion-site adapter
//!
//! Fetches recent submissions from a configured list of topics using the
//! site's OAuth2 client-credentials flow. Requests are paced (at least
//! 100 ms between listing pages, 1 s between topics) to stay friendly to
//! the public API. Missing credentials disable the adapter; they never
//! abort the pipeline.

use super::{FetchBatch, RawRecord, SourceAdapter};
use crate::config::{RedditConfig, SortPolicy};
use crate::error::{Error, Result};
use crate::post::SourceKind;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";

/// Listing pages are capped by the API at 100 items
const PAGE_SIZE: usize = 100;

/// Pause between listing pages within one topic
const PAGE_PACING: Duration = Duration::from_millis(100);

/// Pause between topics
const TOPIC_PACING: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<ListingChild>,
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: Submission,
}

#[derive(Debug, Deserialize)]
struct Submission {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    created_utc: Option<f64>,
}

pub struct RedditAdapter {
    client: reqwest::Client,
    credentials: Option<(String, String)>,
    user_agent: String,
    topics: Vec<String>,
    sort: SortPolicy,
}

impl RedditAdapter {
    pub fn new(config: &RedditConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .expect("Failed to create HTTP client");

        let credentials = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) => Some((id.clone(), secret.clone())),
            _ => None,
        };

        Self {
            client,
            credentials,
            user_agent: config.user_agent.clone(),
            topics: config.topics.clone(),
            sort: config.sort,
        }
    }

    /// Exchange client credentials for a bearer token.
    async fn fetch_token(&self) -> Result<String> {
        let (client_id, client_secret) = self
            .credentials
            .as_ref()
            .ok_or_else(|| Error::Source("discussion credentials not configured".into()))?;

        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| Error::Source(format!("token request failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Source(format!("token request rejected: {e}")))?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Source(format!("token response malformed: {e}")))?;

        Ok(token.access_token)
    }

    fn listing_url(&self, topic: &str) -> String {
        let sort_path = match self.sort {
            SortPolicy::New => "new",
            SortPolicy::Hot => "hot",
            SortPolicy::TopDaily => "top",
        };
        format!("{API_BASE}/r/{topic}/{sort_path}")
    }

    /// Fetch up to `limit` submissions from one topic, paging as needed.
    async fn fetch_topic(&self, token: &str, topic: &str, limit: usize) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        let mut after: Option<String> = None;

        while records.len() < limit {
            let page_size = (limit - records.len()).min(PAGE_SIZE);
            let mut request = self
                .client
                .get(self.listing_url(topic))
                .bearer_auth(token)
                .header("User-Agent", &self.user_agent)
                .query(&[("limit", page_size.to_string())]);
            if matches!(self.sort, SortPolicy::TopDaily) {
                request = request.query(&[("t", "day")]);
            }
            if let Some(cursor) = &after {
                request = request.query(&[("after", cursor.as_str())]);
            }

            let listing: Listing = request
                .send()
                .await
                .map_err(|e| Error::Source(format!("r/{topic} request failed: {e}")))?
                .error_for_status()
                .map_err(|e| Error::Source(format!("r/{topic} request rejected: {e}")))?
                .json()
                .await
                .map_err(|e| Error::Source(format!("r/{topic} listing malformed: {e}")))?;

            if listing.data.children.is_empty() {
                break;
            }

            for child in listing.data.children {
                records.push(submission_to_record(child.data));
            }

            after = listing.data.after;
            if after.is_none() {
                break;
            }
            tokio::time::sleep(PAGE_PACING).await;
        }

        records.truncate(limit);
        Ok(records)
    }
}

fn submission_to_record(submission: Submission) -> RawRecord {
    let url = submission
        .permalink
        .as_deref()
        .map(|p| format!("https://reddit.com{p}"));
    let published = submission
        .created_utc
        .and_then(|epoch| Utc.timestamp_opt(epoch as i64, 0).single());

    RawRecord {
        local_id: Some(submission.id),
        title: submission.title.unwrap_or_default(),
        body: submission.selftext.unwrap_or_default(),
        author: submission.author,
        url,
        published,
    }
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    fn name(&self) -> &'static str {
        "discussion"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Discussion
    }

    fn enabled(&self) -> bool {
        self.credentials.is_some() && !self.topics.is_empty()
    }

    /// `limit` bounds each topic's haul; the listing is re-swept every cycle
    /// and identity-based upserts make the overlap harmless, so no cursor is
    /// handed back.
    async fn fetch_batch(&self, _cursor: Option<String>, limit: usize) -> Result<FetchBatch> {
        if !self.enabled() {
            return Ok(FetchBatch::default());
        }

        let token = self.fetch_token().await?;
        let mut records = Vec::new();

        for (i, topic) in self.topics.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(TOPIC_PACING).await;
            }
            match self.fetch_topic(&token, topic, limit).await {
                Ok(mut topic_records) => {
                    tracing::debug!(topic = %topic, count = topic_records.len(), "Fetched topic listing");
                    records.append(&mut topic_records);
                }
                Err(e) => {
                    // One failing topic does not sink the whole batch
                    tracing::warn!(topic = %topic, "Topic fetch failed: {e}");
                }
            }
        }

        Ok(FetchBatch {
            records,
            next_cursor: None,
        })
    }
}

/// Topics swept when the configuration does not name any.
pub fn default_topics() -> Vec<String> {
    [
        "news",
        "technology",
        "worldnews",
        "memes",
        "todayilearned",
        "askreddit",
        "funny",
        "politics",
        "science",
        "entertainment",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
