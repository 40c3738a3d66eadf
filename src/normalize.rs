//! Normalization: source-specific records → canonical posts
//!
//! Applies the minimum-quality gates and cleaning rules, derives the stable
//! post id, and resolves the publication instant. Records that fail the
//! quality gate are skipped quietly; malformed records surface a record
//! error for the caller to log and count - one bad record never aborts a
//! batch.

use crate::error::{Error, Result};
use crate::post::{Post, SourceKind};
use crate::sources::RawRecord;
use crate::util::{short_hash, truncate_chars};
use chrono::{DateTime, Utc};
use regex::Regex;

/// Cleaned text is capped at this many characters
const MAX_TEXT_CHARS: usize = 8000;

/// Items whose cleaned text is shorter than this are dropped
const MIN_TEXT_CHARS: usize = 10;

/// Text cleaner and record normalizer.
///
/// Construct once at startup; all regexes are compiled in `new`.
pub struct Normalizer {
    html_re: Regex,
    whitespace_re: Regex,
    sentinel_re: Regex,
    exclaim_re: Regex,
    question_re: Regex,
    ellipsis_re: Regex,
    hashtag_re: Regex,
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            html_re: Regex::new(r"<[^>]*>").expect("valid html regex"),
            whitespace_re: Regex::new(r"\s+").expect("valid whitespace regex"),
            sentinel_re: Regex::new(r"\[removed\]|\[deleted\]").expect("valid sentinel regex"),
            exclaim_re: Regex::new(r"!{2,}").expect("valid punctuation regex"),
            question_re: Regex::new(r"\?{2,}").expect("valid punctuation regex"),
            ellipsis_re: Regex::new(r"\.{3,}").expect("valid punctuation regex"),
            hashtag_re: Regex::new(r"(?i)#[a-z0-9_]+").expect("valid hashtag regex"),
        }
    }

    /// Clean and normalize text content.
    ///
    /// Rules, in order: strip markup, collapse whitespace, drop moderation
    /// sentinels, collapse punctuation runs, normalize smart quotes, cap the
    /// length. Idempotent: `clean_text(clean_text(s)) == clean_text(s)`.
    pub fn clean_text(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let text = self.html_re.replace_all(text, " ");
        let text = self.whitespace_re.replace_all(text.trim(), " ");
        // Sentinel removal can leave a doubled space behind; re-collapse so
        // the cleaner stays idempotent
        let text = self.sentinel_re.replace_all(&text, "");
        let text = self.whitespace_re.replace_all(text.trim(), " ");

        let text = self.exclaim_re.replace_all(&text, "!");
        let text = self.question_re.replace_all(&text, "?");
        let text = self.ellipsis_re.replace_all(&text, "...");

        let text = text
            .replace(['\u{201C}', '\u{201D}'], "\"")
            .replace(['\u{2018}', '\u{2019}'], "'");

        truncate_chars(&text, MAX_TEXT_CHARS).trim_end().to_string()
    }

    /// Normalize a raw record into a canonical [`Post`].
    ///
    /// `Ok(None)` means the record failed the minimum-quality gate (cleaned
    /// text under 10 chars) and is silently skipped. A record from which no
    /// stable identity can be derived is malformed and yields a record
    /// error. Entities are left empty here; the feature extractor assigns
    /// them before the post is persisted.
    pub fn normalize(&self, kind: SourceKind, record: &RawRecord) -> Result<Option<Post>> {
        self.normalize_at(kind, record, Utc::now())
    }

    /// `normalize` with an explicit ingestion instant, for tests and replay.
    pub fn normalize_at(
        &self,
        kind: SourceKind,
        record: &RawRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<Post>> {
        let joined = format!("{}\n\n{}", record.title, record.body);
        let joined = joined.trim();

        let text = self.clean_text(joined);
        if text.chars().count() < MIN_TEXT_CHARS {
            return Ok(None);
        }

        let id = self.derive_id(kind, record).ok_or_else(|| {
            Error::Record(format!(
                "no stable identity derivable for {} record {:?}",
                kind, record.title
            ))
        })?;

        // Publication time from the source when present; ingestion time
        // otherwise. Clamped so created_at <= indexed_at always holds.
        let created_at = match record.published {
            Some(published) if published <= now => published,
            _ => now,
        };

        let hashtags = self
            .hashtag_re
            .find_iter(&text)
            .map(|m| m.as_str().to_lowercase())
            .collect();

        Ok(Some(Post {
            id,
            source_kind: kind,
            author: record.author.clone(),
            text,
            url: record.url.clone(),
            created_at,
            hashtags,
            entities: Vec::new(),
        }))
    }

    /// Compose the deterministic post id: `{source_kind}_{local_id}`.
    ///
    /// Syndication entries without a stable id fall back to hashing their
    /// link (or id) together with the publish instant.
    fn derive_id(&self, kind: SourceKind, record: &RawRecord) -> Option<String> {
        match kind {
            SourceKind::Discussion => record
                .local_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .map(|id| format!("{}_{}", kind, id)),
            SourceKind::Feed => {
                let handle = record
                    .local_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .or(record.url.as_deref())
                    .filter(|s| !s.is_empty())?;
                let instant = record
                    .published
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                Some(format!(
                    "{}_{}",
                    kind,
                    short_hash(&format!("{handle}|{instant}"))
                ))
            }
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}
