//! Backtest analytics API client.
//!
//! Speaks the analytics service's generic query endpoint: one POST carrying
//! the query text and a row cap, one fixed JSON envelope back. A single
//! attempt per call — no retries, the caller decides what a failure means.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const QUERY_PATH: &str = "/api/query";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// One untyped cell of the upstream row matrix.
///
/// The upstream reports rows positionally with no type information, so the
/// cell domain is closed here rather than carrying raw JSON values around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Absent,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl CellValue {
    /// Render to the wire string form: absent cells are empty strings,
    /// everything else uses its plain decimal/boolean rendering.
    pub fn render(&self) -> String {
        match self {
            CellValue::Absent => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }
}

/// Fixed response envelope from the query endpoint.
///
/// Lenient on decode: absent fields fall back to their zero values. A false
/// `ok` flag means the whole payload is failed regardless of row content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<CellValue>>,
    #[serde(default)]
    pub row_count: i64,
    #[serde(default)]
    pub error: String,
}

/// Client for the upstream analytics query endpoint.
pub struct BacktestApiClient {
    base_url: String,
    client: Client,
}

impl BacktestApiClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("Runboard/1.0 (Backtest Metadata API)")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run one query against the upstream service.
    ///
    /// `sql` must already be validated non-empty and `limit` clamped into
    /// `[1, 2000]` — this client does not re-check either.
    pub async fn query(&self, sql: &str, limit: u32) -> Result<QueryResponse> {
        let url = format!("{}{}", self.base_url, QUERY_PATH);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "sql": sql, "limit": limit }))
            .send()
            .await
            .context("Failed to reach backtest api")?;

        let status = response.status();
        if status.as_u16() >= 400 {
            bail!("backtest api returned {}", status);
        }

        let envelope: QueryResponse = response
            .json()
            .await
            .context("Failed to parse backtest api response")?;

        if !envelope.ok {
            bail!("backtest api error: {}", envelope.error.trim());
        }

        Ok(envelope)
    }
}
