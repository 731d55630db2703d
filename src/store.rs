//! SQLite-backed run retrieval.
//!
//! Read-only surface over the `runs` relation. Runs are written by the
//! import pipeline; this service never updates them.

use crate::models::{RunDetail, RunSummary};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::info;

/// Applied idempotently so a fresh database still boots. The importer owns
/// the data; this just guarantees the relation exists.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    created_at_utc TEXT,
    date_start_et TEXT,
    date_end_et TEXT,
    params_json TEXT,
    metrics_json TEXT,
    report_path TEXT,
    equity_curve_path TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_created_at
    ON runs(created_at_utc DESC);
"#;

const LIST_RUNS_SQL: &str = "SELECT run_id, created_at_utc, date_start_et, date_end_et \
     FROM runs ORDER BY created_at_utc DESC NULLS LAST LIMIT 200";

const GET_RUN_SQL: &str = "SELECT run_id, created_at_utc, date_start_et, date_end_et, \
     params_json, metrics_json, report_path, equity_curve_path \
     FROM runs WHERE run_id = ?1";

/// Run metadata storage
pub struct RunStore {
    conn: Arc<Mutex<Connection>>,
}

impl RunStore {
    /// Open the runs database and make sure the schema is in place.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize runs schema")?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))
            .unwrap_or(0);

        info!("📊 Run database ready at {} ({} runs)", db_path, count);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Most-recent-first listing, capped at 200 rows. NULL creation
    /// timestamps sort last.
    pub fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(LIST_RUNS_SQL)
            .context("Failed to prepare run listing")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RunSummary {
                    run_id: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    created_at_utc: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    date_start_et: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    date_end_et: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                })
            })
            .context("Failed to query runs")?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row.context("Failed to read run row")?);
        }
        Ok(items)
    }

    /// Point lookup by exact id.
    ///
    /// A missing row and a row that fails to decode both come back as `None`;
    /// callers cannot tell the two apart.
    pub fn get_run(&self, run_id: &str) -> Option<RunDetail> {
        let conn = self.conn.lock();
        conn.query_row(GET_RUN_SQL, params![run_id], |row| {
            Ok(RunDetail {
                run_id: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                created_at_utc: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                date_start_et: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                date_end_et: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                params_json: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                metrics_json: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                report_path: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                equity_curve_path: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            })
        })
        .ok()
    }
}
