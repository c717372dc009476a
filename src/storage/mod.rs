//! SQLite storage layer -- run history, schema, migrations.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// One finished (or interrupted) run as stored in history.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    /// Comma-joined scenario names.
    pub scenarios: String,
    /// `passed`, `failed`, or `interrupted`.
    pub status: String,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub duration_sec: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
    /// Full summary snapshot as JSON, for later inspection.
    pub summary_json: String,
    /// RFC3339 timestamp.
    pub created_at: String,
}

/// Save a finished run to history.
pub fn save_run(pool: &Pool, record: &RunRecord) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO runs (run_id, scenarios, status, total_requests, failed_requests,
                           duration_sec, p50_ms, p95_ms, p99_ms, max_ms, summary_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            record.run_id,
            record.scenarios,
            record.status,
            record.total_requests as i64,
            record.failed_requests as i64,
            record.duration_sec,
            record.p50_ms,
            record.p95_ms,
            record.p99_ms,
            record.max_ms,
            record.summary_json,
            record.created_at,
        ],
    )?;
    Ok(())
}

/// Most recent runs, newest first.
pub fn recent_runs(pool: &Pool, limit: u32) -> Result<Vec<RunRecord>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT run_id, scenarios, status, total_requests, failed_requests,
                duration_sec, p50_ms, p95_ms, p99_ms, max_ms, summary_json, created_at
         FROM runs
         ORDER BY created_at DESC, id DESC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], |row| {
        Ok(RunRecord {
            run_id: row.get(0)?,
            scenarios: row.get(1)?,
            status: row.get(2)?,
            total_requests: row.get::<_, i64>(3)? as u64,
            failed_requests: row.get::<_, i64>(4)? as u64,
            duration_sec: row.get(5)?,
            p50_ms: row.get(6)?,
            p95_ms: row.get(7)?,
            p99_ms: row.get(8)?,
            max_ms: row.get(9)?,
            summary_json: row.get(10)?,
            created_at: row.get(11)?,
        })
    })?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(run_id: &str, created_at: &str, status: &str) -> RunRecord {
        RunRecord {
            run_id: run_id.to_string(),
            scenarios: "breaking".to_string(),
            status: status.to_string(),
            total_requests: 1200,
            failed_requests: 3,
            duration_sec: 360.0,
            p50_ms: 28.0,
            p95_ms: 61.0,
            p99_ms: 112.0,
            max_ms: 950.0,
            summary_json: "{}".to_string(),
            created_at: created_at.to_string(),
        }
    }

    #[test]
    fn test_save_and_read_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("runs.db");
        let pool = open_pool(db_path.to_str().unwrap()).unwrap();

        save_run(&pool, &sample_record("run-1", "2026-08-01T10:00:00Z", "passed")).unwrap();
        save_run(&pool, &sample_record("run-2", "2026-08-02T10:00:00Z", "failed")).unwrap();

        let runs = recent_runs(&pool, 10).unwrap();
        assert_eq!(runs.len(), 2);
        // Newest first.
        assert_eq!(runs[0].run_id, "run-2");
        assert_eq!(runs[0].status, "failed");
        assert_eq!(runs[1].run_id, "run-1");
        assert_eq!(runs[1].total_requests, 1200);
        assert_eq!(runs[1].failed_requests, 3);
    }

    #[test]
    fn test_recent_runs_respects_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("runs.db");
        let pool = open_pool(db_path.to_str().unwrap()).unwrap();

        for i in 0..5 {
            let created = format!("2026-08-0{}T10:00:00Z", i + 1);
            save_run(&pool, &sample_record(&format!("run-{}", i), &created, "passed")).unwrap();
        }

        let runs = recent_runs(&pool, 2).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "run-4");
    }

    #[test]
    fn test_open_pool_creates_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("nested/history/runs.db");
        let pool = open_pool(db_path.to_str().unwrap()).unwrap();
        assert!(recent_runs(&pool, 1).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_run_id_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("runs.db");
        let pool = open_pool(db_path.to_str().unwrap()).unwrap();

        save_run(&pool, &sample_record("run-1", "2026-08-01T10:00:00Z", "passed")).unwrap();
        let dup = save_run(&pool, &sample_record("run-1", "2026-08-01T11:00:00Z", "passed"));
        assert!(dup.is_err());
    }
}
