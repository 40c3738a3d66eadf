//! Configuration for the trend pipeline
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (`$TRENDLENS_CONFIG`, `./trendlens.toml`, or
//!    `~/.config/trendlens/config.toml`)
//! 3. Built-in defaults (lowest priority)
//!
//! A config file that exists but cannot be parsed is a fatal configuration
//! error - failing fast beats silently running on defaults while the user
//! debugs the wrong thing. Unparseable integer overrides merely warn and
//! fall back, matching how the rest of the pipeline degrades.

use crate::error::{Error, Result};
use crate::sources::{default_feed_urls, default_topics};
use serde::Deserialize;
use std::path::PathBuf;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_DB_PATH: &str = "./data/trendlens.db";
const DEFAULT_CHROMA_PATH: &str = "./data/chroma";
const DEFAULT_USER_AGENT: &str = "trendlens/0.2";

// ─────────────────────────────────────────────────────────────────────────────
// Typed sections
// ─────────────────────────────────────────────────────────────────────────────

/// Sort policy for discussion-site topic listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortPolicy {
    New,
    Hot,
    TopDaily,
}

#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: String,
    pub topics: Vec<String>,
    pub sort: SortPolicy,
}

#[derive(Debug, Clone)]
pub struct FeedsConfig {
    pub urls: Vec<String>,
    pub max_entries_per_feed: usize,
}

#[derive(Debug, Clone)]
pub struct TrendConfig {
    pub min_count: i64,
    pub window_hours: i64,
    pub baseline_hours: i64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_count: 10,
            window_hours: 24,
            baseline_hours: 168,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub enabled: bool,
    pub trend_threshold: f64,
    pub growth_threshold: f64,
    pub volume_threshold: i64,
    pub cooldown_seconds: i64,
    pub keyword_watchlist: Vec<String>,
    pub webhook_url: Option<String>,
    pub email_configured: bool,
    pub sink_timeout_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trend_threshold: 2.0,
            growth_threshold: 1.0,
            volume_threshold: 100,
            cooldown_seconds: 3600,
            keyword_watchlist: Vec::new(),
            webhook_url: None,
            email_configured: false,
            sink_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub limit_per_source: usize,
    pub adapter_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            limit_per_source: 100,
            adapter_timeout_secs: 60,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database location
    pub db_path: PathBuf,

    /// Embedding store location, consumed by the external retrieval system;
    /// the pipeline only bootstraps the directory
    pub chroma_path: PathBuf,

    /// Default log level when RUST_LOG is unset
    pub log_level: String,

    pub reddit: RedditConfig,
    pub feeds: FeedsConfig,
    pub trends: TrendConfig,
    pub alerts: AlertConfig,
    pub ingest: IngestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            chroma_path: PathBuf::from(DEFAULT_CHROMA_PATH),
            log_level: "info".to_string(),
            reddit: RedditConfig {
                client_id: None,
                client_secret: None,
                user_agent: DEFAULT_USER_AGENT.to_string(),
                topics: default_topics(),
                sort: SortPolicy::New,
            },
            feeds: FeedsConfig {
                urls: default_feed_urls(),
                max_entries_per_feed: 50,
            },
            trends: TrendConfig::default(),
            alerts: AlertConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub db_path: Option<String>,
    pub chroma_path: Option<String>,
    pub log_level: Option<String>,

    pub reddit: Option<FileReddit>,
    pub feeds: Option<FileFeeds>,
    pub trends: Option<FileTrends>,
    pub alerts: Option<FileAlerts>,
    pub ingest: Option<FileIngest>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileReddit {
    pub user_agent: Option<String>,
    pub topics: Option<Vec<String>>,
    pub sort: Option<SortPolicy>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileFeeds {
    pub urls: Option<Vec<String>>,
    pub max_entries_per_feed: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileTrends {
    pub min_count: Option<i64>,
    pub window_hours: Option<i64>,
    pub baseline_hours: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileAlerts {
    pub enabled: Option<bool>,
    pub trend_threshold: Option<f64>,
    pub growth_threshold: Option<f64>,
    pub volume_threshold: Option<i64>,
    pub cooldown_seconds: Option<i64>,
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileIngest {
    pub limit_per_source: Option<usize>,
    pub adapter_timeout_secs: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Config file path: `$TRENDLENS_CONFIG`, then `./trendlens.toml` if it
    /// exists, then `~/.config/trendlens/config.toml`.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("TRENDLENS_CONFIG") {
            return PathBuf::from(path);
        }
        let local = PathBuf::from("./trendlens.toml");
        if local.exists() {
            return local;
        }
        dirs::home_dir()
            .map(|p| p.join(".config").join("trendlens").join("config.toml"))
            .unwrap_or(local)
    }

    /// Load configuration: env > file > defaults.
    pub fn load() -> Result<Self> {
        let file = Self::load_file_config()?;
        Self::resolve(file, |key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    fn load_file_config() -> Result<FileConfig> {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(Error::Config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Merge file values and environment overrides onto the defaults.
    pub(crate) fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let db_path = env("DB_PATH")
            .or(file.db_path)
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let chroma_path = env("CHROMA_PATH")
            .or(file.chroma_path)
            .map(PathBuf::from)
            .unwrap_or(defaults.chroma_path);
        let log_level = file.log_level.unwrap_or(defaults.log_level);

        let file_reddit = file.reddit.unwrap_or_default();
        let reddit = RedditConfig {
            client_id: env("REDDIT_CLIENT_ID"),
            client_secret: env("REDDIT_CLIENT_SECRET"),
            user_agent: env("REDDIT_USER_AGENT")
                .or(file_reddit.user_agent)
                .unwrap_or(defaults.reddit.user_agent),
            topics: file_reddit.topics.unwrap_or(defaults.reddit.topics),
            sort: file_reddit.sort.unwrap_or(defaults.reddit.sort),
        };

        let file_feeds = file.feeds.unwrap_or_default();
        let urls = match env("RSS_FEEDS") {
            Some(joined) => parse_feed_list(&joined),
            None => file_feeds.urls.unwrap_or_default(),
        };
        let feeds = FeedsConfig {
            // An empty list falls back to the built-in defaults
            urls: if urls.is_empty() {
                defaults.feeds.urls
            } else {
                urls
            },
            max_entries_per_feed: file_feeds
                .max_entries_per_feed
                .unwrap_or(defaults.feeds.max_entries_per_feed),
        };

        let file_trends = file.trends.unwrap_or_default();
        let trends = TrendConfig {
            min_count: int_env("TREND_MIN_COUNT", &env)
                .or(file_trends.min_count)
                .unwrap_or(defaults.trends.min_count),
            window_hours: int_env("TREND_WINDOW_HOURS", &env)
                .or(file_trends.window_hours)
                .unwrap_or(defaults.trends.window_hours),
            baseline_hours: int_env("TREND_BASELINE_HOURS", &env)
                .or(file_trends.baseline_hours)
                .unwrap_or(defaults.trends.baseline_hours),
        };
        if trends.window_hours >= trends.baseline_hours {
            tracing::warn!(
                window_hours = trends.window_hours,
                baseline_hours = trends.baseline_hours,
                "Current window is not shorter than the baseline; scores will be degenerate"
            );
        }
        if trends.window_hours <= 0 || trends.baseline_hours <= 0 {
            return Err(Error::Config(
                "trend windows must be positive hour counts".into(),
            ));
        }

        let file_alerts = file.alerts.unwrap_or_default();
        let email_configured = env("ALERT_EMAIL_USER").is_some()
            && env("ALERT_EMAIL_PASS").is_some()
            && env("ALERT_EMAIL_TO").is_some();
        let alerts = AlertConfig {
            enabled: file_alerts.enabled.unwrap_or(defaults.alerts.enabled),
            trend_threshold: file_alerts
                .trend_threshold
                .unwrap_or(defaults.alerts.trend_threshold),
            growth_threshold: file_alerts
                .growth_threshold
                .unwrap_or(defaults.alerts.growth_threshold),
            volume_threshold: file_alerts
                .volume_threshold
                .unwrap_or(defaults.alerts.volume_threshold),
            cooldown_seconds: file_alerts
                .cooldown_seconds
                .unwrap_or(defaults.alerts.cooldown_seconds),
            keyword_watchlist: file_alerts.keywords.unwrap_or_default(),
            webhook_url: env("ALERT_WEBHOOK_URL"),
            email_configured,
            sink_timeout_secs: defaults.alerts.sink_timeout_secs,
        };

        let file_ingest = file.ingest.unwrap_or_default();
        let ingest = IngestConfig {
            limit_per_source: file_ingest
                .limit_per_source
                .unwrap_or(defaults.ingest.limit_per_source),
            adapter_timeout_secs: file_ingest
                .adapter_timeout_secs
                .unwrap_or(defaults.ingest.adapter_timeout_secs),
        };

        Ok(Self {
            db_path,
            chroma_path,
            log_level,
            reddit,
            feeds,
            trends,
            alerts,
            ingest,
        })
    }
}

/// Parse an integer override; an unparseable value warns and is ignored.
fn int_env(key: &str, env: &impl Fn(&str) -> Option<String>) -> Option<i64> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable integer override");
            None
        }
    }
}

/// Split a comma-separated feed list, keeping only plausible URLs.
fn parse_feed_list(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|url| {
            if url.is_empty() {
                false
            } else if url.starts_with("http://") || url.starts_with("https://") {
                true
            } else {
                tracing::warn!(url, "Ignoring invalid feed URL");
                false
            }
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(FileConfig::default(), no_env).unwrap();
        assert_eq!(config.trends.min_count, 10);
        assert_eq!(config.trends.window_hours, 24);
        assert_eq!(config.trends.baseline_hours, 168);
        assert_eq!(config.alerts.cooldown_seconds, 3600);
        assert!(!config.alerts.enabled);
        assert!(config.reddit.client_id.is_none());
        assert!(!config.feeds.urls.is_empty());
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            db_path = "./file.db"
            [trends]
            min_count = 5
            "#,
        )
        .unwrap();
        let env = env_of(&[("DB_PATH", "./env.db"), ("TREND_MIN_COUNT", "7")]);
        let config = Config::resolve(file, env).unwrap();
        assert_eq!(config.db_path, PathBuf::from("./env.db"));
        assert_eq!(config.trends.min_count, 7);
    }

    #[test]
    fn test_unparseable_int_falls_back() {
        let env = env_of(&[("TREND_MIN_COUNT", "lots")]);
        let config = Config::resolve(FileConfig::default(), env).unwrap();
        assert_eq!(config.trends.min_count, 10);
    }

    #[test]
    fn test_feed_list_parsing_drops_invalid_urls() {
        let env = env_of(&[(
            "RSS_FEEDS",
            "https://a.example/rss, not-a-url ,http://b.example/feed,",
        )]);
        let config = Config::resolve(FileConfig::default(), env).unwrap();
        assert_eq!(
            config.feeds.urls,
            vec!["https://a.example/rss", "http://b.example/feed"]
        );
    }

    #[test]
    fn test_empty_feed_list_falls_back_to_defaults() {
        let env = env_of(&[("RSS_FEEDS", " , ")]);
        let config = Config::resolve(FileConfig::default(), env).unwrap();
        assert!(!config.feeds.urls.is_empty());
    }

    #[test]
    fn test_email_sink_requires_all_credentials() {
        let partial = env_of(&[("ALERT_EMAIL_USER", "u"), ("ALERT_EMAIL_PASS", "p")]);
        assert!(!Config::resolve(FileConfig::default(), partial)
            .unwrap()
            .alerts
            .email_configured);

        let full = env_of(&[
            ("ALERT_EMAIL_USER", "u"),
            ("ALERT_EMAIL_PASS", "p"),
            ("ALERT_EMAIL_TO", "t"),
        ]);
        assert!(Config::resolve(FileConfig::default(), full)
            .unwrap()
            .alerts
            .email_configured);
    }

    #[test]
    fn test_degenerate_window_warns_but_loads() {
        let env = env_of(&[("TREND_WINDOW_HOURS", "200")]);
        let config = Config::resolve(FileConfig::default(), env).unwrap();
        assert_eq!(config.trends.window_hours, 200);
    }

    #[test]
    fn test_nonpositive_window_is_config_error() {
        let env = env_of(&[("TREND_WINDOW_HOURS", "0")]);
        assert!(Config::resolve(FileConfig::default(), env).is_err());
    }

    #[test]
    fn test_alert_file_section() {
        let file: FileConfig = toml::from_str(
            r#"
            [alerts]
            enabled = true
            trend_threshold = 2.5
            keywords = ["bitcoin", "election"]
            "#,
        )
        .unwrap();
        let config = Config::resolve(file, no_env).unwrap();
        assert!(config.alerts.enabled);
        assert!((config.alerts.trend_threshold - 2.5).abs() < 1e-9);
        assert_eq!(config.alerts.keyword_watchlist.len(), 2);
    }

    #[test]
    fn test_sort_policy_parses_kebab_case() {
        let file: FileConfig = toml::from_str(
            r#"
            [reddit]
            sort = "top-daily"
            "#,
        )
        .unwrap();
        let config = Config::resolve(file, no_env).unwrap();
        assert_eq!(config.reddit.sort, SortPolicy::TopDaily);
    }
}
