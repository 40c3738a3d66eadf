//! Alert gating: freshly scored trends → persisted alerts → sink fan-out
//!
//! The gate classifies each trend row against configured thresholds, persists
//! qualifying alerts through the store (which deduplicates per (entity, kind)
//! inside the cooldown window), and hands the structured payload to every
//! configured sink. Sink failures are logged and never block other sinks or
//! future alerts.

use crate::config::AlertConfig;
use crate::post::SourceKind;
use crate::store::{AlertOutcome, NewAlert, Store};
use crate::trends::TrendRow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;

mod webhook;

pub use webhook::WebhookSink;

/// A trend score at or above this is viral regardless of other thresholds.
const VIRAL_SCORE: f64 = 3.0;

/// Classification of a persisted alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TrendSpike,
    Viral,
    Manual,
    Test,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::TrendSpike => "trend_spike",
            AlertKind::Viral => "viral",
            AlertKind::Manual => "manual",
            AlertKind::Test => "test",
        }
    }
}

/// Stable payload handed to sinks. Field set and names are part of the
/// interop contract; timestamps serialize as ISO-8601 UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub kind: AlertKind,
    pub entity: String,
    pub source_kind: SourceKind,
    pub trend_score: f64,
    pub current_count: i64,
    pub growth_rate: f64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// An out-of-process delivery channel for alert payloads.
///
/// Implementations return `anyhow::Result` because delivery failures are
/// log-only; the alert itself is already persisted.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, payload: &AlertPayload) -> anyhow::Result<()>;
}

/// Fallback sink: writes payloads to the log stream. Always available, so
/// alerts stay observable even with no transport configured.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, payload: &AlertPayload) -> anyhow::Result<()> {
        let json = serde_json::to_string(payload)?;
        tracing::info!(target: "trendlens::alert", %json, "Alert");
        Ok(())
    }
}

/// Build the sink set the configuration enables. The log sink is always
/// present; email transport lives outside this process and is only noted.
pub fn build_sinks(config: &AlertConfig) -> Vec<Box<dyn AlertSink>> {
    let mut sinks: Vec<Box<dyn AlertSink>> = vec![Box::new(LogSink)];
    if let Some(url) = &config.webhook_url {
        sinks.push(Box::new(WebhookSink::new(
            url.clone(),
            StdDuration::from_secs(config.sink_timeout_secs),
        )));
    }
    if config.email_configured {
        tracing::debug!("Email sink configured; delivery is handled externally");
    }
    sinks
}

/// Result of one gate pass.
#[derive(Debug, Default)]
pub struct AlertSummary {
    pub triggered: usize,
    pub deduplicated: usize,
    pub sink_failures: usize,
}

pub struct AlertGate<'a> {
    store: &'a Store,
    config: AlertConfig,
    sinks: Vec<Box<dyn AlertSink>>,
}

impl<'a> AlertGate<'a> {
    pub fn new(store: &'a Store, config: AlertConfig, sinks: Vec<Box<dyn AlertSink>>) -> Self {
        Self {
            store,
            config,
            sinks,
        }
    }

    /// Classify a trend row. Watchlisted entities qualify regardless of
    /// thresholds; a viral score wins over a plain spike.
    fn classify(&self, row: &TrendRow) -> Option<(AlertKind, f64, f64)> {
        if row.trend_score >= VIRAL_SCORE {
            return Some((AlertKind::Viral, VIRAL_SCORE, row.trend_score));
        }
        if row.trend_score >= self.config.trend_threshold {
            return Some((
                AlertKind::TrendSpike,
                self.config.trend_threshold,
                row.trend_score,
            ));
        }
        if row.growth_rate >= self.config.growth_threshold {
            return Some((
                AlertKind::TrendSpike,
                self.config.growth_threshold,
                row.growth_rate,
            ));
        }
        if row.current_count >= self.config.volume_threshold {
            return Some((
                AlertKind::TrendSpike,
                self.config.volume_threshold as f64,
                row.current_count as f64,
            ));
        }
        if self.matches_watchlist(&row.entity) {
            return Some((AlertKind::TrendSpike, 0.0, row.trend_score));
        }
        None
    }

    fn matches_watchlist(&self, entity: &str) -> bool {
        let entity = entity.to_lowercase();
        self.config
            .keyword_watchlist
            .iter()
            .any(|keyword| entity.contains(&keyword.to_lowercase()))
    }

    /// Gate one batch of freshly persisted trends.
    pub async fn run(&self, trends: &[TrendRow]) -> AlertSummary {
        let mut summary = AlertSummary::default();
        if !self.config.enabled {
            tracing::debug!("Alerts disabled; skipping gate");
            return summary;
        }

        let cooldown = Duration::seconds(self.config.cooldown_seconds);

        for row in trends {
            let Some((kind, threshold_value, actual_value)) = self.classify(row) else {
                continue;
            };

            let message = format!(
                "Trending alert for {} ({}) with score {:.2}\u{3c3}",
                row.entity, row.source_kind, row.trend_score
            );
            let alert = NewAlert {
                entity: row.entity.clone(),
                kind,
                threshold_value,
                actual_value,
                message: message.clone(),
            };

            match self.store.insert_alert(&alert, cooldown) {
                Ok(AlertOutcome::Inserted(id)) => {
                    summary.triggered += 1;
                    tracing::info!(
                        alert_id = id,
                        entity = %row.entity,
                        kind = kind.as_str(),
                        score = row.trend_score,
                        "Alert triggered"
                    );
                    let payload = AlertPayload {
                        kind,
                        entity: row.entity.clone(),
                        source_kind: row.source_kind,
                        trend_score: row.trend_score,
                        current_count: row.current_count,
                        growth_rate: row.growth_rate,
                        timestamp: row.created_at,
                        message,
                    };
                    summary.sink_failures += self.dispatch(&payload).await;
                }
                Ok(AlertOutcome::Duplicate) => {
                    summary.deduplicated += 1;
                    tracing::debug!(entity = %row.entity, kind = kind.as_str(), "Alert suppressed by cooldown");
                }
                Err(e) => {
                    // Storage trouble on one alert must not stop the pass
                    tracing::error!(entity = %row.entity, "Failed to persist alert: {e}");
                }
            }
        }

        summary
    }

    /// Fan a payload out to every sink; returns the number of failures.
    async fn dispatch(&self, payload: &AlertPayload) -> usize {
        let timeout = StdDuration::from_secs(self.config.sink_timeout_secs);
        let mut failures = 0;
        for sink in &self.sinks {
            let failure = match tokio::time::timeout(timeout, sink.deliver(payload)).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(crate::error::Error::AlertSink(e.to_string())),
                Err(_) => Some(crate::error::Error::AlertSink(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                ))),
            };
            if let Some(e) = failure {
                failures += 1;
                tracing::warn!(sink = sink.name(), "{e}");
            }
        }
        failures
    }
}
