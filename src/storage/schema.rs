//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY,
            run_id TEXT NOT NULL UNIQUE,
            scenarios TEXT NOT NULL,
            status TEXT NOT NULL,
            total_requests INTEGER NOT NULL,
            failed_requests INTEGER NOT NULL,
            duration_sec REAL NOT NULL,
            p50_ms REAL NOT NULL,
            p95_ms REAL NOT NULL,
            p99_ms REAL NOT NULL,
            max_ms REAL NOT NULL,
            summary_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at);",
    )?;

    Ok(())
}
