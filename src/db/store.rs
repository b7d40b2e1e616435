//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Persistence operations the probe engine depends on.
///
/// Each call is expected to be atomic on its own; nothing here spans a
/// whole probe cycle.
pub trait ProbeStore: Send + Sync + 'static {
    fn get_all_targets(&self) -> Result<Vec<Target>, DbError>;

    fn get_target(&self, id: i64) -> Result<Target, DbError>;

    /// Record a probe that received a response. Bumps the latency
    /// accumulators by one sample.
    fn update_probe_stats(
        &self,
        target_id: i64,
        status_code: i32,
        latency_ms: i64,
        first_up_time: Option<DateTime<Utc>>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    /// Record a probe that got no response. Accumulators are left alone.
    fn update_probe_network_error(
        &self,
        target_id: i64,
        latency_ms: i64,
        first_up_time: Option<DateTime<Utc>>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    fn add_probe_history(
        &self,
        target_id: i64,
        latency_ms: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DbError>;

    fn get_schedule_interval(&self) -> Result<String, DbError>;

    fn set_schedule_interval(&self, interval: &str) -> Result<(), DbError>;
}

const TARGET_COLUMNS: &str = "id, url, last_status, last_latency_ms, last_checked, first_up_time, total_probe_count, total_latency_sum";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Target CRUD ---

    /// Add a new target and return it with its ID.
    pub fn add_target(&self, url: &str) -> Result<Target, DbError> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO targets (url) VALUES (?1)", params![url])?;
        Ok(Target {
            id: conn.last_insert_rowid(),
            url: url.to_string(),
            ..Default::default()
        })
    }

    /// Delete a target row. Its history is removed separately.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let affected = conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Probe History ---

    /// Delete every history entry for a target.
    pub fn delete_probe_history(&self, target_id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM probe_history WHERE target_id = ?1",
            params![target_id],
        )?;
        Ok(())
    }

    /// Get the `limit` most recent entries for a target, oldest first.
    pub fn get_probe_history(&self, target_id: i64, limit: i64) -> Result<Vec<ProbeHistory>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, latency_ms, timestamp FROM (
                 SELECT id, target_id, latency_ms, timestamp FROM probe_history
                 WHERE target_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2
             ) ORDER BY timestamp ASC, id ASC",
        )?;

        let history = stmt
            .query_map(params![target_id, limit], history_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(history)
    }

    /// Get all entries for a target at or after `since`, oldest first.
    pub fn get_probe_history_since(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProbeHistory>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, latency_ms, timestamp FROM probe_history
             WHERE target_id = ?1 AND timestamp >= ?2 ORDER BY timestamp ASC, id ASC",
        )?;

        let history = stmt
            .query_map(params![target_id, format_db_time(since)], history_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(history)
    }

    /// Get one page of history across all targets, newest first.
    pub fn get_all_probe_history_paged(&self, limit: i64, offset: i64) -> Result<Vec<ProbeHistory>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT h.target_id, h.latency_ms, h.timestamp, t.url FROM probe_history h
             LEFT JOIN targets t ON h.target_id = t.id
             ORDER BY h.timestamp DESC, h.id DESC LIMIT ?1 OFFSET ?2",
        )?;

        let history = stmt
            .query_map(params![limit, offset], |row| {
                let mut entry = history_from_row(row)?;
                entry.url = row.get(3)?;
                Ok(entry)
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(history)
    }

    /// Count all history entries.
    pub fn count_probe_history(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM probe_history", [], |r| r.get(0))?;
        Ok(count)
    }
}

impl ProbeStore for Store {
    fn get_all_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM targets ORDER BY id ASC", TARGET_COLUMNS))?;

        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn()?;
        let target = conn
            .query_row(
                &format!("SELECT {} FROM targets WHERE id = ?1", TARGET_COLUMNS),
                params![id],
                target_from_row,
            )
            .optional()?;
        target.ok_or(DbError::NotFound)
    }

    fn update_probe_stats(
        &self,
        target_id: i64,
        status_code: i32,
        latency_ms: i64,
        first_up_time: Option<DateTime<Utc>>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE targets SET
                 last_status = ?1,
                 last_latency_ms = ?2,
                 last_checked = ?3,
                 first_up_time = ?4,
                 total_probe_count = total_probe_count + 1,
                 total_latency_sum = total_latency_sum + ?2
             WHERE id = ?5",
            params![
                status_code,
                latency_ms,
                format_db_time(checked_at),
                first_up_time.map(format_db_time),
                target_id,
            ],
        )?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    fn update_probe_network_error(
        &self,
        target_id: i64,
        latency_ms: i64,
        first_up_time: Option<DateTime<Utc>>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE targets SET last_status = ?1, last_latency_ms = ?2, last_checked = ?3, first_up_time = ?4
             WHERE id = ?5",
            params![
                NETWORK_FAILURE_STATUS,
                latency_ms,
                format_db_time(checked_at),
                first_up_time.map(format_db_time),
                target_id,
            ],
        )?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    fn add_probe_history(
        &self,
        target_id: i64,
        latency_ms: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO probe_history (target_id, latency_ms, timestamp) VALUES (?1, ?2, ?3)",
            params![target_id, latency_ms, format_db_time(timestamp)],
        )?;
        Ok(())
    }

    fn get_schedule_interval(&self) -> Result<String, DbError> {
        let conn = self.conn()?;
        let interval: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = 'schedule_interval'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        interval.ok_or(DbError::NotFound)
    }

    fn set_schedule_interval(&self, interval: &str) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES ('schedule_interval', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![interval],
        )?;
        Ok(())
    }
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let last_checked: Option<String> = row.get(4)?;
    let first_up_time: Option<String> = row.get(5)?;
    Ok(Target {
        id: row.get(0)?,
        url: row.get(1)?,
        last_status: row.get(2)?,
        last_latency_ms: row.get(3)?,
        last_checked: last_checked.and_then(|s| parse_db_time(&s)),
        first_up_time: first_up_time.and_then(|s| parse_db_time(&s)),
        total_probe_count: row.get(6)?,
        total_latency_sum: row.get(7)?,
    })
}

fn history_from_row(row: &Row<'_>) -> SqlResult<ProbeHistory> {
    let time_str: String = row.get(2)?;
    Ok(ProbeHistory {
        target_id: row.get(0)?,
        url: None,
        latency_ms: row.get(1)?,
        timestamp: parse_db_time(&time_str).unwrap_or_else(Utc::now),
    })
}

/// Format a timestamp so that lexical order matches time order.
fn format_db_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::NamedTempFile;

    fn open() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_target_crud() {
        let (_tmp, store) = open();

        let target = store.add_target("https://example.com").unwrap();
        assert!(target.id > 0);

        let fetched = store.get_target(target.id).unwrap();
        assert_eq!(fetched, target);
        assert!(!fetched.is_up());
        assert!(fetched.last_checked.is_none());

        assert_eq!(store.get_all_targets().unwrap().len(), 1);

        store.delete_target(target.id).unwrap();
        assert!(matches!(store.get_target(target.id), Err(DbError::NotFound)));
        assert!(matches!(store.delete_target(target.id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_update_probe_stats_increments_accumulators() {
        let (_tmp, store) = open();
        let target = store.add_target("https://example.com").unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let t1 = t0 + ChronoDuration::minutes(1);

        store.update_probe_stats(target.id, 200, 120, Some(t0), t0).unwrap();
        store.update_probe_stats(target.id, 503, 80, None, t1).unwrap();

        let fetched = store.get_target(target.id).unwrap();
        assert_eq!(fetched.last_status, 503);
        assert_eq!(fetched.last_latency_ms, 80);
        assert_eq!(fetched.last_checked, Some(t1));
        assert_eq!(fetched.first_up_time, None);
        assert_eq!(fetched.total_probe_count, 2);
        assert_eq!(fetched.total_latency_sum, 200);
    }

    #[test]
    fn test_update_probe_network_error_keeps_accumulators() {
        let (_tmp, store) = open();
        let target = store.add_target("https://example.com").unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        store.update_probe_stats(target.id, 200, 100, Some(t0), t0).unwrap();
        store
            .update_probe_network_error(target.id, 5000, None, t0 + ChronoDuration::minutes(1))
            .unwrap();

        let fetched = store.get_target(target.id).unwrap();
        assert_eq!(fetched.last_status, NETWORK_FAILURE_STATUS);
        assert_eq!(fetched.last_latency_ms, 5000);
        assert_eq!(fetched.first_up_time, None);
        assert_eq!(fetched.total_probe_count, 1);
        assert_eq!(fetched.total_latency_sum, 100);
    }

    #[test]
    fn test_update_missing_target() {
        let (_tmp, store) = open();
        let now = Utc::now();
        assert!(matches!(
            store.update_probe_stats(42, 200, 10, Some(now), now),
            Err(DbError::NotFound)
        ));
        assert!(matches!(
            store.update_probe_network_error(42, 10, None, now),
            Err(DbError::NotFound)
        ));
    }

    #[test]
    fn test_probe_history_queries() {
        let (_tmp, store) = open();
        let a = store.add_target("https://a.example").unwrap();
        let b = store.add_target("https://b.example").unwrap();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for i in 0..5 {
            store
                .add_probe_history(a.id, 100 + i, base + ChronoDuration::hours(i))
                .unwrap();
        }
        store.add_probe_history(b.id, 7, base).unwrap();

        let recent = store.get_probe_history(a.id, 3).unwrap();
        let latencies: Vec<i64> = recent.iter().map(|h| h.latency_ms).collect();
        assert_eq!(latencies, vec![102, 103, 104]);

        let since = store
            .get_probe_history_since(a.id, base + ChronoDuration::hours(3))
            .unwrap();
        assert_eq!(since.len(), 2);
        assert_eq!(since[0].timestamp, base + ChronoDuration::hours(3));

        assert_eq!(store.count_probe_history().unwrap(), 6);

        let page = store.get_all_probe_history_paged(2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].latency_ms, 104);
        assert_eq!(page[0].url.as_deref(), Some("https://a.example"));

        store.delete_probe_history(a.id).unwrap();
        assert_eq!(store.count_probe_history().unwrap(), 1);
    }

    #[test]
    fn test_schedule_interval() {
        let (_tmp, store) = open();
        assert_eq!(store.get_schedule_interval().unwrap(), "@every 1m");

        store.set_schedule_interval("@every 5m").unwrap();
        assert_eq!(store.get_schedule_interval().unwrap(), "@every 5m");
    }

    #[test]
    fn test_reopen_keeps_interval() {
        let tmp = NamedTempFile::new().unwrap();
        Store::new(tmp.path())
            .unwrap()
            .set_schedule_interval("@every 30m")
            .unwrap();

        let store = Store::new(tmp.path()).unwrap();
        assert_eq!(store.get_schedule_interval().unwrap(), "@every 30m");
    }

    #[test]
    fn test_parse_db_time() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 34, 56).unwrap();
        assert_eq!(parse_db_time(&format_db_time(t)), Some(t));
        assert_eq!(parse_db_time("2024-01-01 12:34:56"), Some(t));
        assert_eq!(parse_db_time("2024-01-01T12:34:56Z"), Some(t));
        assert_eq!(parse_db_time("garbage"), None);
    }
}
