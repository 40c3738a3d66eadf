//! Canonical data model for ingested items
//!
//! Every source adapter produces records that normalize into a [`Post`].
//! Entities are stored in a canonical comma-joined form so they can be
//! persisted in a single TEXT column and scanned with LIKE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a post came from. Extensible - new adapters add a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Discussion-site submissions (topic listings fetched via the site API)
    Discussion,
    /// Syndication feed entries (RSS/Atom)
    Feed,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Discussion => "discussion",
            SourceKind::Feed => "feed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "discussion" => Some(SourceKind::Discussion),
            "feed" => Some(SourceKind::Feed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical record of one ingested item.
///
/// `id` is `{source_kind}_{local_id}` and uniquely identifies the post
/// forever; re-ingestion of the same source record upserts rather than
/// duplicating. `created_at` is the item's publication time, `indexed_at`
/// is set by the store on first insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub source_kind: SourceKind,
    pub author: Option<String>,
    pub text: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Ordered hashtag tokens, lowercase, leading `#` included
    pub hashtags: Vec<String>,
    /// Sorted, de-duplicated entity tokens (see features module)
    pub entities: Vec<String>,
}

impl Post {
    /// Canonical comma-joined form used for the entities TEXT column.
    pub fn entities_joined(&self) -> String {
        self.entities.join(",")
    }

    pub fn hashtags_joined(&self) -> String {
        self.hashtags.join(",")
    }

    /// Split a comma-joined column back into tokens, dropping empties.
    pub fn split_joined(joined: &str) -> Vec<String> {
        joined
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}
