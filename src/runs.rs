//! Run retrieval over the configured backend.
//!
//! The backend choice — direct database or upstream query proxy — is wired
//! once at startup and never changes. Everything here is a stateless
//! translation layer over whichever side is active: typed rows from the
//! store, or an untyped column/row matrix from the proxy, normalized into
//! one output shape.

use crate::backtest_api::{BacktestApiClient, CellValue, QueryResponse};
use crate::models::{RunDetail, RunSummary};
use crate::store::RunStore;
use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Ceiling on proxy-backed list/detail retrievals. The free-form query
/// endpoint applies its own, longer ceiling.
const PROXY_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

const LIST_RUNS_SQL: &str = "SELECT run_id, created_at_utc, date_start_et, date_end_et \
     FROM runs ORDER BY created_at_utc DESC LIMIT 200";

/// A failed retrieval, split by which side of the wire broke.
#[derive(Debug)]
pub enum BackendError {
    /// Local database failure.
    Database(anyhow::Error),
    /// Proxy failure: transport, or an error reported by the upstream.
    Upstream(anyhow::Error),
}

/// Backend-dispatching run repository.
pub struct RunService {
    store: Arc<RunStore>,
    backtest: Option<Arc<BacktestApiClient>>,
}

impl RunService {
    pub fn new(store: Arc<RunStore>, backtest: Option<Arc<BacktestApiClient>>) -> Self {
        Self { store, backtest }
    }

    /// The upstream client, when the proxy backend is configured.
    pub fn backtest(&self) -> Option<&Arc<BacktestApiClient>> {
        self.backtest.as_ref()
    }

    /// Bounded most-recent-first listing.
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>, BackendError> {
        let Some(backtest) = self.backtest.as_ref() else {
            return self.store.list_runs().map_err(BackendError::Database);
        };

        let envelope = timeout(PROXY_FETCH_TIMEOUT, backtest.query(LIST_RUNS_SQL, 200))
            .await
            .map_err(|_| BackendError::Upstream(anyhow!("backtest api timed out")))?
            .map_err(BackendError::Upstream)?;

        Ok(summaries_from_envelope(&envelope))
    }

    /// Full detail for one run; `None` when no run matches.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunDetail>, BackendError> {
        let Some(backtest) = self.backtest.as_ref() else {
            return Ok(self.store.get_run(run_id));
        };

        let sql = format!(
            "SELECT run_id, created_at_utc, date_start_et, date_end_et, params_json, \
             metrics_json, report_path, equity_curve_path FROM runs WHERE run_id = {} LIMIT 1",
            sql_quote(run_id)
        );

        let envelope = timeout(PROXY_FETCH_TIMEOUT, backtest.query(&sql, 1))
            .await
            .map_err(|_| BackendError::Upstream(anyhow!("backtest api timed out")))?
            .map_err(BackendError::Upstream)?;

        Ok(detail_from_envelope(&envelope))
    }
}

/// Map the listing envelope onto summaries, column-by-name.
fn summaries_from_envelope(envelope: &QueryResponse) -> Vec<RunSummary> {
    let idx = column_index(&envelope.columns);
    envelope
        .rows
        .iter()
        .map(|row| RunSummary {
            run_id: cell_string(row, &idx, "run_id"),
            created_at_utc: cell_string(row, &idx, "created_at_utc"),
            date_start_et: cell_string(row, &idx, "date_start_et"),
            date_end_et: cell_string(row, &idx, "date_end_et"),
        })
        .collect()
}

/// Map the first row of a detail envelope, if any.
fn detail_from_envelope(envelope: &QueryResponse) -> Option<RunDetail> {
    let row = envelope.rows.first()?;
    let idx = column_index(&envelope.columns);
    Some(RunDetail {
        run_id: cell_string(row, &idx, "run_id"),
        created_at_utc: cell_string(row, &idx, "created_at_utc"),
        date_start_et: cell_string(row, &idx, "date_start_et"),
        date_end_et: cell_string(row, &idx, "date_end_et"),
        params_json: cell_string(row, &idx, "params_json"),
        metrics_json: cell_string(row, &idx, "metrics_json"),
        report_path: cell_string(row, &idx, "report_path"),
        equity_curve_path: cell_string(row, &idx, "equity_curve_path"),
    })
}

/// Column positions keyed by lowercased, whitespace-trimmed name.
fn column_index(columns: &[String]) -> HashMap<String, usize> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.trim().to_lowercase(), i))
        .collect()
}

/// Cell for `key`, rendered as a string. A missing column or out-of-range
/// position yields an empty string, never an error.
fn cell_string(row: &[CellValue], idx: &HashMap<String, usize>, key: &str) -> String {
    idx.get(key)
        .and_then(|&i| row.get(i))
        .map(CellValue::render)
        .unwrap_or_default()
}

/// Quote `v` as a SQL string literal, doubling embedded single quotes.
///
/// The upstream only accepts bare query text, so the id has to travel inline.
/// TODO: switch to bind parameters if the query endpoint ever grows them.
fn sql_quote(v: &str) -> String {
    format!("'{}'", v.replace('\'', "''"))
}
