//! HTTP surface for the run metadata service.
//!
//! Six endpoints: health, the two run retrievals, the free-form query
//! passthrough, and the settings pair. Handlers validate input, hand off to
//! the run service, and map error classes onto status codes; every failure
//! body is `{"error": message}`.

use anyhow::anyhow;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use crate::backtest_api::QueryResponse;
use crate::middleware::request_logging;
use crate::models::{RunDetail, RunSummary};
use crate::runs::{BackendError, RunService};

/// Ceiling on the free-form query endpoint. Execution time there is
/// caller-controlled, so it gets far more room than the fixed retrievals.
const QUERY_TIMEOUT: Duration = Duration::from_secs(20);

const DEFAULT_QUERY_LIMIT: u32 = 200;
const MAX_QUERY_LIMIT: u32 = 2000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub runs: Arc<RunService>,
}

/// Create the API router
pub fn create_router(runs: Arc<RunService>) -> Router {
    let state = AppState { runs };

    Router::new()
        .route("/health", get(health_check))
        .route("/v1/backtests/runs", get(list_runs))
        .route("/v1/backtests/run", get(get_run))
        .route("/v1/backtests/query", post(run_query))
        .route("/v1/settings", get(get_settings).post(update_settings))
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Bounded most-recent-first run listing
async fn list_runs(State(state): State<AppState>) -> Result<Json<RunsResponse>, ApiError> {
    let items = state.runs.list_runs().await?;
    Ok(Json(RunsResponse {
        count: items.len(),
        items,
    }))
}

/// Full detail record for a single run
async fn get_run(
    State(state): State<AppState>,
    Query(params): Query<RunQuery>,
) -> Result<Json<RunDetail>, ApiError> {
    let run_id = params.run_id.unwrap_or_default();
    if run_id.is_empty() {
        return Err(ApiError::BadRequest("run_id is required".to_string()));
    }

    state
        .runs
        .get_run(&run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("run not found".to_string()))
}

/// Free-form query passthrough to the upstream analytics service
async fn run_query(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<QueryResponse>, ApiError> {
    let Some(backtest) = state.runs.backtest() else {
        return Err(ApiError::Unavailable(
            "backtest api not configured".to_string(),
        ));
    };

    let req: QueryRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("invalid JSON body".to_string()))?;

    let sql = req.sql.trim();
    if sql.is_empty() {
        return Err(ApiError::BadRequest("sql is required".to_string()));
    }
    let limit = clamp_limit(req.limit);

    let envelope = tokio::time::timeout(QUERY_TIMEOUT, backtest.query(sql, limit))
        .await
        .map_err(|_| ApiError::Upstream(anyhow!("backtest api timed out")))?
        .map_err(ApiError::Upstream)?;

    Ok(Json(envelope))
}

/// Current feature flags. Fixed defaults — persistence is a known gap.
async fn get_settings() -> Json<SettingsResponse> {
    Json(SettingsResponse {
        llm_read: true,
        llm_write: false,
    })
}

/// Accept a settings update and echo it back. The payload is decoded
/// best-effort and never stored.
async fn update_settings(body: Bytes) -> Json<serde_json::Value> {
    let applied: Option<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_slice(&body).ok();
    Json(json!({ "ok": true, "applied": applied }))
}

/// Default when the requested limit is non-positive; hard ceiling regardless
/// of what was asked for.
fn clamp_limit(limit: i64) -> u32 {
    if limit <= 0 {
        DEFAULT_QUERY_LIMIT
    } else if limit > MAX_QUERY_LIMIT as i64 {
        MAX_QUERY_LIMIT
    } else {
        limit as u32
    }
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct RunQuery {
    run_id: Option<String>,
}

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    sql: String,
    #[serde(default)]
    limit: i64,
}

#[derive(Serialize)]
struct RunsResponse {
    items: Vec<RunSummary>,
    count: usize,
}

#[derive(Serialize)]
struct SettingsResponse {
    llm_read: bool,
    llm_write: bool,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Database(anyhow::Error),
    Upstream(anyhow::Error),
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Database(e) => ApiError::Database(e),
            BackendError::Upstream(e) => ApiError::Upstream(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Database(err) => {
                tracing::error!("Database error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err))
            }
            ApiError::Upstream(err) => {
                tracing::error!("Backtest api error: {:#}", err);
                (StatusCode::BAD_GATEWAY, format!("{:#}", err))
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest_api::BacktestApiClient;
    use crate::store::RunStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Router over a seeded scratch database, no proxy configured.
    fn db_router() -> (Router, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("runs.db");
        let path = db_path.to_str().expect("utf-8 path");

        let store = RunStore::open(path).expect("open store");
        let conn = rusqlite::Connection::open(&db_path).expect("seeding connection");
        conn.execute(
            "INSERT INTO runs VALUES ('abc123', '2024-03-01T12:00:00Z', '2024-02-01', \
             '2024-02-29', '{\"fast\":5}', NULL, NULL, NULL)",
            [],
        )
        .expect("insert full run");
        conn.execute(
            "INSERT INTO runs (run_id) VALUES ('bare-run')",
            [],
        )
        .expect("insert bare run");
        drop(conn);

        let runs = Arc::new(RunService::new(Arc::new(store), None));
        (create_router(runs), dir)
    }

    /// Router with a proxy client wired in. The client points at a dead
    /// address; tests only exercise paths that never reach the wire.
    fn proxy_router() -> (Router, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("runs.db");
        let store = RunStore::open(path.to_str().expect("utf-8 path")).expect("open store");

        let client = Arc::new(BacktestApiClient::new("http://127.0.0.1:9"));
        let runs = Arc::new(RunService::new(Arc::new(store), Some(client)));
        (create_router(runs), dir)
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).expect("json body");
        (status, value)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    fn post_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _dir) = db_router();
        let (status, body) = send(&router, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_list_runs_count_matches_items() {
        let (router, _dir) = db_router();
        let (status, body) = send(&router, get_request("/v1/backtests/runs")).await;
        assert_eq!(status, StatusCode::OK);

        let items = body["items"].as_array().expect("items array");
        assert_eq!(body["count"].as_u64().expect("count"), items.len() as u64);

        // Every item carries all four fields as strings, even for NULL rows.
        for item in items {
            for field in ["run_id", "created_at_utc", "date_start_et", "date_end_et"] {
                assert!(item[field].is_string(), "{} must be a string", field);
            }
        }
        let bare = items
            .iter()
            .find(|i| i["run_id"] == "bare-run")
            .expect("bare-run listed");
        assert_eq!(bare["created_at_utc"], "");
    }

    #[tokio::test]
    async fn test_get_run_requires_run_id() {
        let (router, _dir) = db_router();
        let (status, body) = send(&router, get_request("/v1/backtests/run")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "run_id is required" }));
    }

    #[tokio::test]
    async fn test_get_run_unknown_is_404() {
        let (router, _dir) = db_router();
        let (status, body) =
            send(&router, get_request("/v1/backtests/run?run_id=missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "run not found" }));
    }

    #[tokio::test]
    async fn test_get_run_detail_is_fully_populated() {
        let (router, _dir) = db_router();
        let (status, body) =
            send(&router, get_request("/v1/backtests/run?run_id=abc123")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["run_id"], "abc123");
        assert_eq!(body["params_json"], "{\"fast\":5}");
        // Nullable columns are empty strings, never null/omitted.
        assert_eq!(body["metrics_json"], "");
        assert_eq!(body["report_path"], "");
        assert_eq!(body["equity_curve_path"], "");
    }

    #[tokio::test]
    async fn test_query_without_proxy_is_503() {
        let (router, _dir) = db_router();
        let (status, body) = send(
            &router,
            post_request("/v1/backtests/query", r#"{"sql":"SELECT 1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, json!({ "error": "backtest api not configured" }));
    }

    #[tokio::test]
    async fn test_query_rejects_invalid_json() {
        let (router, _dir) = proxy_router();
        let (status, body) = send(
            &router,
            post_request("/v1/backtests/query", "{not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "invalid JSON body" }));
    }

    #[tokio::test]
    async fn test_query_rejects_blank_sql() {
        let (router, _dir) = proxy_router();
        for payload in [r#"{"sql":""}"#, r#"{"sql":"   \n\t "}"#, r#"{"limit":10}"#] {
            let (status, body) =
                send(&router, post_request("/v1/backtests/query", payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, json!({ "error": "sql is required" }));
        }
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let (router, _dir) = db_router();

        let (status, body) = send(&router, get_request("/v1/settings")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "llm_read": true, "llm_write": false }));

        let (status, body) = send(
            &router,
            post_request("/v1/settings", r#"{"llm_write": true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true, "applied": { "llm_write": true } }));
    }

    #[tokio::test]
    async fn test_settings_update_ignores_bad_bodies() {
        let (router, _dir) = db_router();
        for payload in ["not json at all", "[1,2,3]", "42"] {
            let (status, body) = send(&router, post_request("/v1/settings", payload)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "ok": true, "applied": null }));
        }
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(-5), 200);
        assert_eq!(clamp_limit(0), 200);
        assert_eq!(clamp_limit(1), 1);
        assert_eq!(clamp_limit(200), 200);
        assert_eq!(clamp_limit(2000), 2000);
        assert_eq!(clamp_limit(2001), 2000);
        assert_eq!(clamp_limit(1_000_000), 2000);
    }
}
