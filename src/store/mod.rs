//! Durable storage for posts, trends and alerts
//!
//! SQLite in WAL mode. One writer connection guarded by a mutex performs all
//! mutations inside transactions; a small read-only pool serves concurrent
//! queries. Schema setup is idempotent (`CREATE TABLE/INDEX IF NOT EXISTS`)
//! and the migration policy is additive only.
//!
//! # Architecture
//!
//! ```text
//! IngestCoordinator ──┐
//! TrendEngine ────────┼──→ writer Connection (Mutex, transactions)
//! AlertGate ──────────┘
//!
//! CLI stats/health ──────→ r2d2 read pool (up to 4 connections, WAL readers)
//! ```
//!
//! No component outside this module touches the tables directly.

use crate::alerts::AlertKind;
use crate::error::{Error, Result};
use crate::post::{Post, SourceKind};
use crate::trends::TrendRow;
use chrono::{DateTime, Duration, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Read pool size; writes never go through the pool
const READ_POOL_SIZE: u32 = 4;

/// Outcome of an alert insertion attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Row persisted; contains the new alert id
    Inserted(i64),
    /// An active alert for the same (entity, kind) exists inside the
    /// cooldown window
    Duplicate,
}

/// Alert fields as persisted (id and status are store-managed).
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub entity: String,
    pub kind: AlertKind,
    pub threshold_value: f64,
    pub actual_value: f64,
    pub message: String,
}

/// Result of a retention cleanup pass.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub trends_deleted: usize,
    pub alerts_deleted: usize,
}

/// Integrity/health report for the database.
#[derive(Debug)]
pub struct HealthReport {
    pub status: String,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl HealthReport {
    pub fn ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Aggregate statistics for the `stats` command.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub total_posts: i64,
    pub posts_with_entities: i64,
    pub recent_posts_24h: i64,
    pub source_breakdown: Vec<(String, i64)>,
    pub trends_24h: i64,
    pub avg_trend_score: f64,
    pub max_trend_score: f64,
    pub high_trends_24h: i64,
    pub viral_trends_24h: i64,
    pub alerts_7d: i64,
    pub active_alerts: i64,
    pub file_size_mb: f64,
}

pub struct Store {
    writer: Mutex<Connection>,
    readers: Pool<SqliteConnectionManager>,
    db_path: PathBuf,
}

impl Store {
    /// Open (or create) the database, apply pragmas, and initialize the
    /// schema. Initialization is idempotent and safe to run on every start.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(&db_path)?;
        writer.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            "#,
        )?;
        Self::init_schema(&writer)?;

        let manager = SqliteConnectionManager::file(&db_path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);
        let readers = Pool::builder()
            .max_size(READ_POOL_SIZE)
            .build(manager)
            .map_err(Error::from)?;

        // Verify a pooled reader actually works before handing the store out
        let conn = readers.get().map_err(Error::from)?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        drop(conn);

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            db_path,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                source_kind TEXT NOT NULL,
                author TEXT,
                text TEXT NOT NULL,
                url TEXT,
                created_at TEXT NOT NULL,
                hashtags TEXT NOT NULL DEFAULT '',
                entities TEXT NOT NULL DEFAULT '',
                indexed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
            CREATE INDEX IF NOT EXISTS idx_posts_source_kind ON posts(source_kind);
            CREATE INDEX IF NOT EXISTS idx_posts_entities ON posts(entities);

            CREATE TABLE IF NOT EXISTS trends (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                source_kind TEXT NOT NULL,
                current_count INTEGER NOT NULL,
                baseline_count INTEGER NOT NULL,
                trend_score REAL NOT NULL,
                growth_rate REAL NOT NULL,
                velocity REAL NOT NULL,
                z_score REAL NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(entity, source_kind, created_at)
            );
            CREATE INDEX IF NOT EXISTS idx_trends_entity ON trends(entity);
            CREATE INDEX IF NOT EXISTS idx_trends_created_at ON trends(created_at);
            CREATE INDEX IF NOT EXISTS idx_trends_score ON trends(trend_score);

            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                kind TEXT NOT NULL,
                threshold_value REAL,
                actual_value REAL,
                message TEXT,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active'
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at);
            CREATE INDEX IF NOT EXISTS idx_alerts_entity ON alerts(entity);
            "#,
        )?;
        Ok(())
    }

    fn reader(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.readers.get().map_err(Error::from)
    }

    /// Test-only raw reader, for asserting on persisted rows directly.
    #[cfg(test)]
    pub(crate) fn reader_for_tests(&self) -> PooledConnection<SqliteConnectionManager> {
        self.readers.get().expect("reader pool")
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| Error::Storage("writer lock poisoned".into()))
    }

    /// Run a write closure, retrying once when SQLite reports the database
    /// as busy/locked (transient contention with an external reader).
    fn with_write_retry<T>(&self, mut op: impl FnMut(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.writer()?;
        match op(&conn) {
            Ok(value) => Ok(value),
            Err(e) if is_transient(&e) => {
                tracing::warn!("Transient storage error, retrying once: {e}");
                std::thread::sleep(std::time::Duration::from_millis(100));
                op(&conn).map_err(Error::from)
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    // ── Posts ────────────────────────────────────────────────────────────

    /// Insert or refresh one post. Idempotent by id: the original
    /// `indexed_at` is preserved on conflict, everything else is replaced.
    #[allow(dead_code)] // Reprocessing path: single-post entity re-assignment
    pub fn upsert_post(&self, post: &Post) -> Result<()> {
        self.with_write_retry(|conn| Self::upsert_post_inner(conn, post, Utc::now()))
    }

    /// Insert or refresh a batch of posts inside a single transaction.
    /// Returns the number of rows written.
    pub fn upsert_posts(&self, posts: &[Post]) -> Result<usize> {
        if posts.is_empty() {
            return Ok(0);
        }
        let indexed_at = Utc::now();
        self.with_write_retry(|conn| {
            conn.execute("BEGIN TRANSACTION", [])?;
            let mut written = 0usize;
            for post in posts {
                match Self::upsert_post_inner(conn, post, indexed_at) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        conn.execute("ROLLBACK", [])?;
                        return Err(e);
                    }
                }
            }
            conn.execute("COMMIT", [])?;
            Ok(written)
        })
    }

    fn upsert_post_inner(
        conn: &Connection,
        post: &Post,
        indexed_at: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        conn.execute(
            r#"
            INSERT INTO posts (id, source_kind, author, text, url, created_at, hashtags, entities, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                source_kind = excluded.source_kind,
                author = excluded.author,
                text = excluded.text,
                url = excluded.url,
                created_at = excluded.created_at,
                hashtags = excluded.hashtags,
                entities = excluded.entities
            "#,
            params![
                post.id,
                post.source_kind.as_str(),
                post.author,
                post.text,
                post.url,
                post.created_at.to_rfc3339(),
                post.hashtags_joined(),
                post.entities_joined(),
                indexed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Posts whose publication time falls inside `[from, to]`, optionally
    /// restricted to one source, ordered oldest first.
    #[allow(dead_code)] // Read path for dashboard and retrieval consumers
    pub fn posts_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        kind: Option<SourceKind>,
    ) -> Result<Vec<Post>> {
        let conn = self.reader()?;
        let mut sql = String::from(
            "SELECT id, source_kind, author, text, url, created_at, hashtags, entities
             FROM posts
             WHERE datetime(created_at) >= datetime(?1) AND datetime(created_at) <= datetime(?2)",
        );
        if kind.is_some() {
            sql.push_str(" AND source_kind = ?3");
        }
        sql.push_str(" ORDER BY datetime(created_at) ASC");

        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Post> { row_to_post(row) };

        let rows = match kind {
            Some(k) => stmt
                .query_map(
                    params![from.to_rfc3339(), to.to_rfc3339(), k.as_str()],
                    map_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map(params![from.to_rfc3339(), to.to_rfc3339()], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(rows)
    }

    /// Per-(entity, source) post counts over posts newer than `cutoff` that
    /// carry entities. The comma-joined column is exploded here; each post
    /// contributes one count per entity it mentions.
    pub fn entity_counts_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<HashMap<(String, SourceKind), i64>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT entities, source_kind FROM posts
             WHERE datetime(created_at) > datetime(?1)
               AND entities IS NOT NULL AND entities != ''",
        )?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut counts: HashMap<(String, SourceKind), i64> = HashMap::new();
        for row in rows {
            let (entities, kind_str) = row?;
            let Some(kind) = SourceKind::parse(&kind_str) else {
                continue;
            };
            for entity in Post::split_joined(&entities) {
                *counts.entry((entity, kind)).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Total posts, and posts that carry at least one entity. Used by the
    /// data-sufficiency gate before trend runs.
    pub fn post_counts(&self) -> Result<(i64, i64)> {
        let conn = self.reader()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |r| r.get(0))?;
        let with_entities: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE entities IS NOT NULL AND entities != ''",
            [],
            |r| r.get(0),
        )?;
        Ok((total, with_entities))
    }

    // ── Trends ───────────────────────────────────────────────────────────

    /// Persist a scored trend batch. Rows are keyed on
    /// (entity, source_kind, created_at); re-running an identical batch
    /// replaces rather than duplicates. Returns the number of rows written.
    pub fn insert_trends(&self, rows: &[TrendRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.with_write_retry(|conn| {
            conn.execute("BEGIN TRANSACTION", [])?;
            for row in rows {
                let result = conn.execute(
                    r#"
                    INSERT OR REPLACE INTO trends
                        (entity, source_kind, current_count, baseline_count, trend_score,
                         growth_rate, velocity, z_score, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    params![
                        row.entity,
                        row.source_kind.as_str(),
                        row.current_count,
                        row.baseline_count,
                        row.trend_score,
                        row.growth_rate,
                        row.velocity,
                        row.z_score,
                        row.created_at.to_rfc3339(),
                    ],
                );
                if let Err(e) = result {
                    conn.execute("ROLLBACK", [])?;
                    return Err(e);
                }
            }
            conn.execute("COMMIT", [])?;
            Ok(rows.len())
        })
    }

    // ── Alerts ───────────────────────────────────────────────────────────

    /// Insert an alert unless an active one for the same (entity, kind)
    /// already exists inside the cooldown window.
    pub fn insert_alert(&self, alert: &NewAlert, cooldown: Duration) -> Result<AlertOutcome> {
        let now = Utc::now();
        let cutoff = now - cooldown;
        self.with_write_retry(|conn| {
            let existing: i64 = conn.query_row(
                "SELECT COUNT(*) FROM alerts
                 WHERE entity = ?1 AND kind = ?2 AND status = 'active'
                   AND datetime(created_at) > datetime(?3)",
                params![alert.entity, alert.kind.as_str(), cutoff.to_rfc3339()],
                |r| r.get(0),
            )?;
            if existing > 0 {
                return Ok(AlertOutcome::Duplicate);
            }
            conn.execute(
                "INSERT INTO alerts (entity, kind, threshold_value, actual_value, message, created_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active')",
                params![
                    alert.entity,
                    alert.kind.as_str(),
                    alert.threshold_value,
                    alert.actual_value,
                    alert.message,
                    now.to_rfc3339(),
                ],
            )?;
            Ok(AlertOutcome::Inserted(conn.last_insert_rowid()))
        })
    }

    // ── Maintenance ──────────────────────────────────────────────────────

    /// Remove trends older than `days_to_keep` days, and resolved alerts
    /// older than twice that.
    pub fn cleanup_older_than(&self, days_to_keep: i64) -> Result<CleanupReport> {
        let now = Utc::now();
        let trend_cutoff = (now - Duration::days(days_to_keep)).to_rfc3339();
        let alert_cutoff = (now - Duration::days(days_to_keep * 2)).to_rfc3339();
        self.with_write_retry(|conn| {
            let trends_deleted = conn.execute(
                "DELETE FROM trends WHERE datetime(created_at) < datetime(?1)",
                params![trend_cutoff],
            )?;
            let alerts_deleted = conn.execute(
                "DELETE FROM alerts
                 WHERE datetime(created_at) < datetime(?1) AND status = 'resolved'",
                params![alert_cutoff],
            )?;
            Ok(CleanupReport {
                trends_deleted,
                alerts_deleted,
            })
        })
    }

    /// Reclaim space and defragment.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.writer()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }

    /// Online backup to `target`, or to a timestamped sibling of the
    /// database file when no target is given. Returns the backup path.
    pub fn backup_to(&self, target: Option<&Path>) -> Result<PathBuf> {
        let backup_path = match target {
            Some(path) => path.to_path_buf(),
            None => {
                let stamp = Utc::now().format("%Y%m%d_%H%M%S");
                let mut os = self.db_path.clone().into_os_string();
                os.push(format!(".backup_{stamp}"));
                PathBuf::from(os)
            }
        };
        if let Some(parent) = backup_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = self.writer()?;
        let mut dst = Connection::open(&backup_path)?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut dst)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(50), None)?;
        Ok(backup_path)
    }

    /// Integrity check plus advisory findings: missing indexes, archivable
    /// history, oversize database file.
    pub fn health(&self) -> Result<HealthReport> {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        let conn = self.reader()?;

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
        if integrity != "ok" {
            issues.push(format!("Integrity check failed: {integrity}"));
        }

        let expected_indexes = [
            "idx_posts_created_at",
            "idx_posts_source_kind",
            "idx_posts_entities",
            "idx_trends_entity",
            "idx_trends_created_at",
            "idx_trends_score",
            "idx_alerts_created_at",
            "idx_alerts_entity",
        ];
        let mut missing = Vec::new();
        for index in expected_indexes {
            let found: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
                params![index],
                |r| r.get(0),
            )?;
            if found == 0 {
                missing.push(index);
            }
        }
        if !missing.is_empty() {
            recommendations.push(format!("Missing indexes: {}", missing.join(", ")));
        }

        let archivable_cutoff = (Utc::now() - Duration::days(90)).to_rfc3339();
        let old_trends: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trends WHERE datetime(created_at) < datetime(?1)",
            params![archivable_cutoff],
            |r| r.get(0),
        )?;
        if old_trends > 1000 {
            recommendations.push(format!("Consider archiving {old_trends} old trend records"));
        }

        if let Ok(metadata) = std::fs::metadata(&self.db_path) {
            let size_mb = metadata.len() as f64 / (1024.0 * 1024.0);
            if size_mb > 100.0 {
                recommendations.push(format!(
                    "Database is {size_mb:.1}MB, consider running cleanup and vacuum"
                ));
            }
        }

        let status = if !issues.is_empty() {
            "needs_attention"
        } else if !recommendations.is_empty() {
            "healthy_with_recommendations"
        } else {
            "healthy"
        };

        Ok(HealthReport {
            status: status.to_string(),
            issues,
            recommendations,
        })
    }

    /// Aggregate totals for the `stats` command.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.reader()?;
        let mut stats = StoreStats::default();

        stats.total_posts = conn.query_row("SELECT COUNT(*) FROM posts", [], |r| r.get(0))?;
        stats.posts_with_entities = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE entities IS NOT NULL AND entities != ''",
            [],
            |r| r.get(0),
        )?;

        let day_ago = (Utc::now() - Duration::hours(24)).to_rfc3339();
        stats.recent_posts_24h = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE datetime(created_at) > datetime(?1)",
            params![day_ago],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT source_kind, COUNT(*) FROM posts GROUP BY source_kind ORDER BY COUNT(*) DESC",
        )?;
        stats.source_breakdown = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let (trends, avg, max, high, viral) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(AVG(trend_score), 0.0),
                    COALESCE(MAX(trend_score), 0.0),
                    COUNT(CASE WHEN trend_score >= 2.0 THEN 1 END),
                    COUNT(CASE WHEN trend_score >= 3.0 THEN 1 END)
             FROM trends WHERE datetime(created_at) > datetime(?1)",
            params![day_ago],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, f64>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            },
        )?;
        stats.trends_24h = trends;
        stats.avg_trend_score = avg;
        stats.max_trend_score = max;
        stats.high_trends_24h = high;
        stats.viral_trends_24h = viral;

        let week_ago = (Utc::now() - Duration::days(7)).to_rfc3339();
        let (alerts, active) = conn.query_row(
            "SELECT COUNT(*), COUNT(CASE WHEN status = 'active' THEN 1 END)
             FROM alerts WHERE datetime(created_at) > datetime(?1)",
            params![week_ago],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
        )?;
        stats.alerts_7d = alerts;
        stats.active_alerts = active;

        if let Ok(metadata) = std::fs::metadata(&self.db_path) {
            stats.file_size_mb = metadata.len() as f64 / (1024.0 * 1024.0);
        }

        Ok(stats)
    }
}

fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    let kind_str: String = row.get(1)?;
    let created_at: String = row.get(5)?;
    let hashtags: String = row.get(6)?;
    let entities: String = row.get(7)?;

    let source_kind = SourceKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown source_kind: {kind_str}").into(),
        )
    })?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
        })?
        .with_timezone(&Utc);

    Ok(Post {
        id: row.get(0)?,
        source_kind,
        author: row.get(2)?,
        text: row.get(3)?,
        url: row.get(4)?,
        created_at,
        hashtags: Post::split_joined(&hashtags),
        entities: Post::split_joined(&entities),
    })
}
