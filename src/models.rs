//! Domain models and service configuration.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Service configuration, resolved once from the environment at startup and
/// never mutated afterward.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub backtest_api_base: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path = match std::env::var("DATABASE_PATH") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => bail!("DATABASE_PATH is required"),
        };

        let port = std::env::var("API_PORT")
            .unwrap_or_else(|_| "9090".to_string())
            .parse()
            .unwrap_or(9090);

        // Support both env var names to avoid misconfiguration.
        let backtest_api_base = ["BACKTEST_API_BASE", "BACKTEST_API_URL"]
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()));

        Ok(Self {
            database_path,
            port,
            backtest_api_base,
        })
    }
}

/// One row of the bounded run listing.
///
/// Nullable columns always render as empty strings so the response shape is
/// fully populated for every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub created_at_utc: String,
    pub date_start_et: String,
    pub date_end_et: String,
}

/// Full detail record for a single run, artifact locations included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDetail {
    pub run_id: String,
    pub created_at_utc: String,
    pub date_start_et: String,
    pub date_end_et: String,
    pub params_json: String,
    pub metrics_json: String,
    pub report_path: String,
    pub equity_curve_path: String,
}
