//! Feature extraction: cleaned text → entity tokens
//!
//! Produces the entity set that drives trend counting. Determinism is a hard
//! requirement here - the same input must always yield the same sorted,
//! de-duplicated entity list, because entities are persisted on the post and
//! re-counted across windows.
//!
//! # Pipeline
//!
//! ```text
//! text ──→ strip html ──→ tokenize ──┐
//!                      ├─ hashtags ──┤
//!                      ├─ mentions ──┼──→ union ──→ filter ──→ sort+dedup
//!                      ├─ keywords ──┤
//!                      └─ category ──┘
//! ```

use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Minimum token length considered meaningful
const MIN_TOKEN_LEN: usize = 3;

/// Number of top keywords contributed to the entity set
const KEYWORD_TOP_K: usize = 5;

/// Minimum in-text frequency for a keyword to count
const KEYWORD_MIN_FREQ: usize = 2;

/// Common English function words plus web/markup tokens that leak through
/// HTML stripping, plus discussion-site boilerplate.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has",
    "he", "in", "is", "it", "its", "of", "on", "that", "the", "to", "was",
    "were", "will", "with", "this", "but", "they", "have", "had", "what",
    "said", "each", "which", "their", "time", "if", "up", "out", "many",
    "then", "them", "these", "so", "some", "her", "would", "make", "like",
    "into", "him", "two", "more", "very", "after", "words", "just", "where",
    "most", "now", "people", "my", "made", "over", "did", "down", "only",
    "way", "find", "use", "may", "water", "long", "little", "get", "through",
    "back", "much", "before", "go", "good", "new", "write", "our", "used",
    "me", "man", "too", "any", "day", "same", "right", "look", "think",
    "also", "around", "another", "came", "come", "work", "three", "must",
    "because", "does", "part", "even", "place", "well", "such", "here",
    "take", "why", "help", "put", "different", "away", "turn", "want",
    "every", "don't", "should", "never", "year", "still", "public", "read",
    "know", "large", "available", "end", "become", "member", "please",
    "including", "old", "see", "however", "given", "both", "important",
    "though", "information", "nothing", "those", "business", "home", "mr",
    "ms", "dr", "could", "might", "need", "going", "doing",
    // web/markup tokens
    "http", "https", "www", "html", "href", "div", "span", "com", "org",
    "amp", "nbsp", "quot",
    // discussion-site boilerplate
    "reddit", "post", "comment", "submission", "thread", "op", "edit",
    "deleted", "removed",
];

/// Internet slang shortforms normalized to canonical long forms
const INTERNET_SLANG: &[(&str, &str)] = &[
    ("lol", "laugh_out_loud"),
    ("lmao", "laughing_my_ass_off"),
    ("rofl", "rolling_on_floor_laughing"),
    ("omg", "oh_my_god"),
    ("wtf", "what_the_f"),
    ("fml", "f_my_life"),
    ("tbh", "to_be_honest"),
    ("imo", "in_my_opinion"),
    ("imho", "in_my_humble_opinion"),
    ("afaik", "as_far_as_i_know"),
    ("irl", "in_real_life"),
    ("tldr", "too_long_didnt_read"),
    ("eli5", "explain_like_im_5"),
    ("ama", "ask_me_anything"),
    ("til", "today_i_learned"),
    ("ysk", "you_should_know"),
    ("psa", "public_service_announcement"),
];

/// Curated category dictionaries. Each match contributes the matched literal
/// (lowercased) as an entity. The set is enumerated and stable.
const CATEGORY_PATTERNS: &[(&str, &str)] = &[
    (
        "covid",
        r"(?i)\b(covid|coronavirus|pandemic|vaccine|pfizer|moderna|omicron|delta)\b",
    ),
    (
        "climate",
        r"(?i)\b(climate|global warming|greenhouse|carbon|emission|greta)\b",
    ),
    (
        "crypto",
        r"(?i)\b(bitcoin|crypto|blockchain|ethereum|nft|dogecoin|elon)\b",
    ),
    (
        "politics",
        r"(?i)\b(trump|biden|election|democrat|republican|congress|senate)\b",
    ),
    (
        "tech",
        r"(?i)\b(apple|google|microsoft|amazon|meta|twitter|tiktok|ai|chatgpt)\b",
    ),
    (
        "sports",
        r"(?i)\b(nfl|nba|fifa|olympics|superbowl|worldcup|playoff)\b",
    ),
    (
        "entertainment",
        r"(?i)\b(netflix|disney|marvel|starwars|game of thrones|stranger things)\b",
    ),
];

/// Rule-based entity extractor.
///
/// Construct once at startup and share; all regexes are compiled in `new`.
pub struct FeatureExtractor {
    word_re: Regex,
    hashtag_re: Regex,
    mention_re: Regex,
    html_re: Regex,
    categories: Vec<(&'static str, Regex)>,
    stop_words: HashSet<&'static str>,
    slang: HashMap<&'static str, &'static str>,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            // Words start with a letter, so numeric-only strings never match
            word_re: Regex::new(r"\b[a-z][a-z0-9_']*\b").expect("valid word regex"),
            hashtag_re: Regex::new(r"(?i)#[a-z0-9_]+").expect("valid hashtag regex"),
            mention_re: Regex::new(r"(?i)@[a-z0-9_]+").expect("valid mention regex"),
            html_re: Regex::new(r"<[^>]*>").expect("valid html regex"),
            categories: CATEGORY_PATTERNS
                .iter()
                .map(|(name, pattern)| (*name, Regex::new(pattern).expect("valid category regex")))
                .collect(),
            stop_words: STOP_WORDS.iter().copied().collect(),
            slang: INTERNET_SLANG.iter().copied().collect(),
        }
    }

    /// Tokenize into normalized words: lowercase, length >= 3, at least one
    /// letter, stop words removed, slang shortforms mapped to long forms.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let lower = text.to_lowercase();
        self.word_re
            .find_iter(&lower)
            .map(|m| m.as_str())
            .filter(|w| w.chars().count() >= MIN_TOKEN_LEN && !self.stop_words.contains(w))
            .map(|w| self.slang.get(w).copied().unwrap_or(w).to_string())
            .collect()
    }

    /// All `#token` occurrences, lowercased, leading `#` included.
    pub fn hashtags(&self, text: &str) -> Vec<String> {
        self.hashtag_re
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }

    /// All `@token` occurrences, lowercased, leading `@` included.
    pub fn mentions(&self, text: &str) -> Vec<String> {
        self.mention_re
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }

    /// Top-K most frequent tokens with their counts, ordered by descending
    /// frequency then token (ties broken lexicographically for determinism).
    pub fn keywords(&self, text: &str, top_k: usize) -> Vec<(String, usize)> {
        let tokens = self.tokenize(text);
        if tokens.is_empty() {
            return Vec::new();
        }
        let mut freq: HashMap<String, usize> = HashMap::new();
        for token in tokens {
            *freq.entry(token).or_insert(0) += 1;
        }
        let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(top_k);
        ranked
    }

    /// Extract the full entity set from cleaned text.
    ///
    /// Returns a sorted list with no duplicates. Entries shorter than three
    /// characters, numeric-only, non-alphanumeric, or in the stop list are
    /// dropped.
    pub fn extract_entities(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        // Defensive re-strip: upstream cleaning should already have removed
        // markup, but entity tokens must never contain tag fragments
        let text = self.html_re.replace_all(text, " ");

        let mut entities: HashSet<String> = HashSet::new();

        for tag in self.hashtags(&text) {
            let stripped = tag.trim_start_matches('#');
            if stripped.chars().count() >= 2 {
                entities.insert(stripped.to_string());
            }
        }

        for mention in self.mentions(&text) {
            let stripped = mention.trim_start_matches('@');
            if stripped.chars().count() >= 2 {
                entities.insert(stripped.to_string());
            }
        }

        for (keyword, freq) in self.keywords(&text, KEYWORD_TOP_K) {
            if freq >= KEYWORD_MIN_FREQ {
                entities.insert(keyword);
            }
        }

        for (_category, pattern) in &self.categories {
            for m in pattern.find_iter(&text) {
                entities.insert(m.as_str().to_lowercase());
            }
        }

        let mut cleaned: Vec<String> = entities
            .into_iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| self.is_valid_entity(e))
            .collect();
        cleaned.sort();
        cleaned.dedup();
        cleaned
    }

    fn is_valid_entity(&self, entity: &str) -> bool {
        entity.chars().count() >= MIN_TOKEN_LEN
            && !self.stop_words.contains(entity)
            && !entity.chars().all(|c| c.is_ascii_digit())
            && entity.chars().all(|c| c.is_alphanumeric())
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}
