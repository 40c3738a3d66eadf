//! Trend scoring: short-window entity counts against a longer baseline
//!
//! One run counts (entity, source) mentions in the current window and the
//! baseline window, then scores each surviving entity per source group:
//!
//! ```text
//! z_score     = (current_count - baseline_mean) / baseline_std   (std 0 → 1)
//! growth_rate = (current - baseline) / baseline                  (baseline 0 → 999 sentinel)
//! velocity    = current_count / window_hours
//! trend_score = z_score
//!               × (1 + min(growth_rate, 5))   when growth_rate > 1
//!               × 1.2                         when velocity > baseline_mean / baseline_hours
//! ```
//!
//! The boosts compound, in that order. All rows from one run share one
//! `created_at`; history accumulates across runs.

use crate::config::TrendConfig;
use crate::error::Result;
use crate::post::SourceKind;
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Finite stand-in for "grew from nothing"; infinities are never persisted.
const GROWTH_SENTINEL: f64 = 999.0;

/// Growth boost is capped so one explosive entity cannot dwarf the scale.
const GROWTH_BOOST_CAP: f64 = 5.0;

/// Velocity boost factor
const VELOCITY_BOOST: f64 = 1.2;

/// Below this many posts (or posts with entities) the scores are mostly
/// noise; the run still proceeds but warns.
const MIN_POSTS_FOR_SIGNAL: i64 = 50;
const MIN_ENTITY_POSTS_FOR_SIGNAL: i64 = 20;

/// One scored (entity, source) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendRow {
    pub entity: String,
    pub source_kind: SourceKind,
    pub current_count: i64,
    pub baseline_count: i64,
    pub trend_score: f64,
    pub growth_rate: f64,
    pub velocity: f64,
    pub z_score: f64,
    pub created_at: DateTime<Utc>,
}

pub struct TrendEngine<'a> {
    store: &'a Store,
    config: TrendConfig,
}

impl<'a> TrendEngine<'a> {
    pub fn new(store: &'a Store, config: TrendConfig) -> Self {
        Self { store, config }
    }

    /// Run one scoring cycle: count both windows, score, persist ranked
    /// rows. Returns the persisted rows (highest score first).
    pub fn run(&self) -> Result<Vec<TrendRow>> {
        let now = Utc::now();

        let (total_posts, entity_posts) = self.store.post_counts()?;
        if total_posts < MIN_POSTS_FOR_SIGNAL || entity_posts < MIN_ENTITY_POSTS_FOR_SIGNAL {
            tracing::warn!(
                total_posts,
                entity_posts,
                "Little data available; trend scores will be noisy"
            );
        }

        let current = self
            .store
            .entity_counts_since(now - Duration::hours(self.config.window_hours))?;
        let baseline = self
            .store
            .entity_counts_since(now - Duration::hours(self.config.baseline_hours))?;

        let rows = score_counts(&current, &baseline, &self.config, now);
        let written = self.store.insert_trends(&rows)?;
        tracing::info!(
            trends = written,
            window_hours = self.config.window_hours,
            baseline_hours = self.config.baseline_hours,
            "Trend cycle complete"
        );
        Ok(rows)
    }
}

/// Pure scoring over pre-aggregated counts. Separated from the engine so
/// the math is testable without a database.
pub fn score_counts(
    current: &HashMap<(String, SourceKind), i64>,
    baseline: &HashMap<(String, SourceKind), i64>,
    config: &TrendConfig,
    now: DateTime<Utc>,
) -> Vec<TrendRow> {
    // Left-join current against baseline; entities below min_count drop out
    let mut by_source: HashMap<SourceKind, Vec<(String, i64, i64)>> = HashMap::new();
    for ((entity, kind), &current_count) in current {
        if current_count < config.min_count {
            continue;
        }
        let baseline_count = baseline
            .get(&(entity.clone(), *kind))
            .copied()
            .unwrap_or(0);
        by_source
            .entry(*kind)
            .or_default()
            .push((entity.clone(), current_count, baseline_count));
    }

    let mut rows = Vec::new();
    for (kind, mut group) in by_source {
        // Sample std is undefined for a single observation
        if group.len() < 2 {
            tracing::debug!(source = %kind, "Skipping group with fewer than 2 entities");
            continue;
        }
        // Stable input order so identical data always scores identically
        group.sort_by(|a, b| a.0.cmp(&b.0));

        let n = group.len() as f64;
        let baseline_mean = group.iter().map(|(_, _, b)| *b as f64).sum::<f64>() / n;
        let variance = group
            .iter()
            .map(|(_, _, b)| {
                let d = *b as f64 - baseline_mean;
                d * d
            })
            .sum::<f64>()
            / (n - 1.0);
        let mut baseline_std = variance.sqrt();
        if baseline_std == 0.0 {
            baseline_std = 1.0;
        }

        let velocity_floor = baseline_mean / config.baseline_hours as f64;

        for (entity, current_count, baseline_count) in group {
            let z_score = (current_count as f64 - baseline_mean) / baseline_std;

            let growth_rate = if baseline_count > 0 {
                (current_count - baseline_count) as f64 / baseline_count as f64
            } else if current_count > 0 {
                GROWTH_SENTINEL
            } else {
                0.0
            };

            let velocity = current_count as f64 / config.window_hours as f64;

            let mut trend_score = z_score;
            if growth_rate > 1.0 {
                trend_score *= 1.0 + growth_rate.min(GROWTH_BOOST_CAP);
            }
            if velocity > velocity_floor {
                trend_score *= VELOCITY_BOOST;
            }

            rows.push(TrendRow {
                entity,
                source_kind: kind,
                current_count,
                baseline_count,
                trend_score,
                growth_rate,
                velocity,
                z_score,
                created_at: now,
            });
        }
    }

    rows.sort_by(|a, b| {
        b.trend_score
            .total_cmp(&a.trend_score)
            .then_with(|| a.entity.cmp(&b.entity))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_count: i64) -> TrendConfig {
        TrendConfig {
            min_count,
            window_hours: 24,
            baseline_hours: 168,
        }
    }

    fn counts(pairs: &[(&str, SourceKind, i64)]) -> HashMap<(String, SourceKind), i64> {
        pairs
            .iter()
            .map(|(entity, kind, count)| ((entity.to_string(), *kind), *count))
            .collect()
    }

    #[test]
    fn test_z_score_matches_definition_exactly() {
        let current = counts(&[
            ("alpha", SourceKind::Feed, 20),
            ("delta", SourceKind::Feed, 6),
        ]);
        let baseline = counts(&[
            ("alpha", SourceKind::Feed, 20),
            ("delta", SourceKind::Feed, 6),
        ]);
        let rows = score_counts(&current, &baseline, &config(5), Utc::now());
        assert_eq!(rows.len(), 2);

        // Sample statistics over baseline counts {20, 6}
        let mean = 13.0;
        let std = ((20.0_f64 - 13.0).powi(2) + (6.0_f64 - 13.0).powi(2)).sqrt(); // /(n-1)=1
        let alpha = rows.iter().find(|r| r.entity == "alpha").unwrap();
        assert!((alpha.z_score - (20.0 - mean) / std).abs() < 1e-9);
        assert!(alpha.z_score > 0.0);
        assert_eq!(alpha.current_count, 20);
        assert_eq!(alpha.baseline_count, 20);
        assert!(alpha.growth_rate.abs() < 1e-9);
    }

    #[test]
    fn test_min_count_filter() {
        let current = counts(&[
            ("alpha", SourceKind::Feed, 20),
            ("tiny", SourceKind::Feed, 3),
            ("delta", SourceKind::Feed, 12),
        ]);
        let baseline = current.clone();
        let rows = score_counts(&current, &baseline, &config(10), Utc::now());
        let entities: Vec<&str> = rows.iter().map(|r| r.entity.as_str()).collect();
        assert!(entities.contains(&"alpha"));
        assert!(entities.contains(&"delta"));
        assert!(!entities.contains(&"tiny"));
    }

    #[test]
    fn test_single_entity_group_is_skipped() {
        let current = counts(&[("lonely", SourceKind::Feed, 50)]);
        let baseline = counts(&[("lonely", SourceKind::Feed, 10)]);
        let rows = score_counts(&current, &baseline, &config(5), Utc::now());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_groups_are_per_source() {
        // One entity per source: both groups too small, even though the
        // total row count is 2
        let current = counts(&[
            ("alpha", SourceKind::Feed, 50),
            ("beta", SourceKind::Discussion, 50),
        ]);
        let baseline = current.clone();
        let rows = score_counts(&current, &baseline, &config(5), Utc::now());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_zero_baseline_gets_finite_sentinel_growth() {
        let current = counts(&[
            ("fresh", SourceKind::Feed, 30),
            ("steady", SourceKind::Feed, 10),
        ]);
        let baseline = counts(&[("steady", SourceKind::Feed, 40)]);
        let rows = score_counts(&current, &baseline, &config(5), Utc::now());
        let fresh = rows.iter().find(|r| r.entity == "fresh").unwrap();
        assert_eq!(fresh.baseline_count, 0);
        assert_eq!(fresh.growth_rate, 999.0);
        assert!(fresh.growth_rate.is_finite());
        // Still z-scored against the group mean
        assert!(fresh.z_score.is_finite());
    }

    #[test]
    fn test_zero_std_substitutes_one() {
        let current = counts(&[
            ("alpha", SourceKind::Feed, 25),
            ("beta", SourceKind::Feed, 15),
        ]);
        // Identical baselines: std would be 0
        let baseline = counts(&[
            ("alpha", SourceKind::Feed, 10),
            ("beta", SourceKind::Feed, 10),
        ]);
        let rows = score_counts(&current, &baseline, &config(5), Utc::now());
        let alpha = rows.iter().find(|r| r.entity == "alpha").unwrap();
        // std substituted with 1: z = current - mean
        assert!((alpha.z_score - (25.0 - 10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_boosts_compound_in_order() {
        let cfg = config(5);
        let now = Utc::now();
        // beta anchors the group; alpha grows 4x with high velocity
        let current = counts(&[
            ("alpha", SourceKind::Feed, 40),
            ("beta", SourceKind::Feed, 6),
        ]);
        let baseline = counts(&[
            ("alpha", SourceKind::Feed, 10),
            ("beta", SourceKind::Feed, 50),
        ]);
        let rows = score_counts(&current, &baseline, &cfg, now);
        let alpha = rows.iter().find(|r| r.entity == "alpha").unwrap();

        let mean = 30.0;
        let std = (((10.0_f64 - 30.0).powi(2) + (50.0_f64 - 30.0).powi(2)) / 1.0).sqrt();
        let z = (40.0 - mean) / std;
        let growth = (40.0 - 10.0) / 10.0; // 3.0 > 1 → boost
        let velocity = 40.0 / 24.0; // > 30/168 → boost
        assert!(velocity > mean / 168.0);
        let expected = z * (1.0 + growth) * 1.2;
        assert!((alpha.trend_score - expected).abs() < 1e-9);
        assert!((alpha.growth_rate - growth).abs() < 1e-9);
    }

    #[test]
    fn test_growth_boost_is_capped() {
        let now = Utc::now();
        let current = counts(&[
            ("burst", SourceKind::Feed, 100),
            ("anchor", SourceKind::Feed, 10),
        ]);
        let baseline = counts(&[
            ("burst", SourceKind::Feed, 2),
            ("anchor", SourceKind::Feed, 80),
        ]);
        let rows = score_counts(&current, &baseline, &config(5), now);
        let burst = rows.iter().find(|r| r.entity == "burst").unwrap();
        // growth = 49x, but the boost multiplier is capped at (1 + 5)
        assert!((burst.growth_rate - 49.0).abs() < 1e-9);
        let unboosted = burst.z_score;
        let velocity_boosted = burst.velocity > (2.0 + 80.0) / 2.0 / 168.0;
        let expected = unboosted * 6.0 * if velocity_boosted { 1.2 } else { 1.0 };
        assert!((burst.trend_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_rows_share_created_at_and_sort_desc() {
        let now = Utc::now();
        let current = counts(&[
            ("alpha", SourceKind::Feed, 40),
            ("beta", SourceKind::Feed, 6),
            ("gamma", SourceKind::Feed, 12),
        ]);
        let baseline = counts(&[
            ("alpha", SourceKind::Feed, 10),
            ("beta", SourceKind::Feed, 50),
            ("gamma", SourceKind::Feed, 12),
        ]);
        let rows = score_counts(&current, &baseline, &config(5), now);
        assert!(rows.iter().all(|r| r.created_at == now));
        for pair in rows.windows(2) {
            assert!(pair[0].trend_score >= pair[1].trend_score);
        }
    }

    #[test]
    fn test_single_entity_baseline_end_to_end() {
        use crate::post::Post;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let store = crate::store::Store::open(dir.path().join("e2e.db")).unwrap();
        let now = Utc::now();

        let seeded = |id: String, entity: &str, created_at| Post {
            id,
            source_kind: SourceKind::Feed,
            author: None,
            text: "Seeded post body long enough to matter".to_string(),
            url: None,
            created_at,
            hashtags: Vec::new(),
            entities: vec![entity.to_string()],
        };

        let mut posts = Vec::new();
        // 20 mentions of alpha, all inside the last 24h (so its baseline
        // count equals its current count: the window is a subset)
        for i in 0..20i64 {
            posts.push(seeded(
                format!("feed_alpha{i}"),
                "alpha",
                now - Duration::hours((i % 20) + 1),
            ));
        }
        // A second low-volume current entity so the source group is
        // scoreable (sample std needs two observations)
        for i in 0..6i64 {
            posts.push(seeded(
                format!("feed_delta{i}"),
                "delta",
                now - Duration::hours((i % 20) + 1),
            ));
        }
        // 180 mentions of beta spread across the baseline, all older than
        // the current window
        for i in 0..180i64 {
            posts.push(seeded(
                format!("feed_beta{i}"),
                "beta",
                now - Duration::hours(30) - Duration::minutes(i * 40),
            ));
        }
        store.upsert_posts(&posts).unwrap();

        let engine = TrendEngine::new(
            &store,
            TrendConfig {
                min_count: 5,
                window_hours: 24,
                baseline_hours: 168,
            },
        );
        let rows = engine.run().unwrap();

        let alpha = rows.iter().find(|r| r.entity == "alpha").unwrap();
        assert_eq!(alpha.current_count, 20);
        assert_eq!(alpha.baseline_count, 20);
        assert!(alpha.growth_rate.abs() < 1e-9);
        assert!(alpha.z_score > 0.0);
        // beta has no current-window mentions and never gets scored
        assert!(!rows.iter().any(|r| r.entity == "beta"));
        // all persisted rows carry the run timestamp
        assert!(rows.iter().all(|r| r.created_at == rows[0].created_at));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let now = Utc::now();
        let current = counts(&[
            ("alpha", SourceKind::Feed, 40),
            ("beta", SourceKind::Feed, 15),
            ("gamma", SourceKind::Discussion, 22),
            ("delta", SourceKind::Discussion, 11),
        ]);
        let baseline = counts(&[
            ("alpha", SourceKind::Feed, 12),
            ("beta", SourceKind::Feed, 60),
            ("gamma", SourceKind::Discussion, 5),
            ("delta", SourceKind::Discussion, 44),
        ]);
        let a = score_counts(&current, &baseline, &config(5), now);
        let b = score_counts(&current, &baseline, &config(5), now);
        assert_eq!(a, b);
    }
}
