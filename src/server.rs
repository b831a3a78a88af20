//! HTTP API server.
//!
//! Exposes the conversational pipeline and the dashboard aggregation
//! endpoints as a JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Run the full RAG pipeline for one question |
//! | `GET`  | `/timeseries_at_depth` | Time series for one cell at one depth |
//! | `GET`  | `/depth_time_contour` | Dense depth×time matrix for one cell |
//! | `GET`  | `/trajectories` | Per-float position series |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/` | Welcome message |
//!
//! Every route is also served under the `/api` prefix, which is what the
//! dashboard frontend calls.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "variable 'oxygen' is invalid" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser dashboard
//! can call the API directly.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::aggregate;
use crate::config::Config;
use crate::pipeline::{Pipeline, PipelineResponse};
use crate::store::SqlExecutor;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    executor: Arc<dyn SqlExecutor>,
}

/// Starts the HTTP server and runs until the process is terminated.
pub async fn run_server(
    config: &Config,
    pipeline: Arc<Pipeline>,
    executor: Arc<dyn SqlExecutor>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline,
        executor,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(api_routes())
        .nest("/api", api_routes())
        .layer(cors)
        .with_state(state);

    tracing::info!("FloatChat API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/timeseries_at_depth", get(handle_timeseries))
        .route("/depth_time_contour", get(handle_contour))
        .route("/trajectories", get(handle_trajectories))
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map internal error messages to the most appropriate HTTP status.
/// Empty-result conditions become 404s, validation failures 400s, and
/// everything else (including propagated database errors) a 500.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();

    if msg.contains("no data found") || msg.contains("no relevant documents") {
        not_found(msg)
    } else if msg.contains("invalid") || msg.contains("must be") || msg.contains("must not") {
        bad_request(msg)
    } else {
        internal(msg)
    }
}

fn parse_date(raw: &str, name: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| bad_request(format!("{} '{}' is invalid: expected YYYY-MM-DD", name, raw)))
}

// ============ GET / ============

#[derive(Serialize)]
struct WelcomeResponse {
    message: String,
}

async fn handle_root() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to the FloatChat API!".to_string(),
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default = "default_k")]
    k: usize,
}

fn default_k() -> usize {
    10
}

/// Handler for `POST /query`: the full conversational pipeline.
async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<PipelineResponse>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let k = if request.k == 0 {
        state.config.chroma.default_top_k
    } else {
        request.k
    };

    let response = state
        .pipeline
        .run(&request.query, k)
        .await
        .map_err(classify_error)?;

    Ok(Json(response))
}

// ============ GET /timeseries_at_depth ============

#[derive(Deserialize)]
struct TimeSeriesParams {
    lat: f64,
    lng: f64,
    start_date: String,
    end_date: String,
    depth: i64,
}

/// Handler for `GET /timeseries_at_depth`.
async fn handle_timeseries(
    State(state): State<AppState>,
    Query(params): Query<TimeSeriesParams>,
) -> Result<Json<aggregate::TimeSeries>, AppError> {
    let start = parse_date(&params.start_date, "start_date")?;
    let end = parse_date(&params.end_date, "end_date")?;

    let series = aggregate::timeseries_at_depth(
        state.executor.as_ref(),
        state.config.grid.cell_size_degrees,
        params.lat,
        params.lng,
        start,
        end,
        params.depth,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(series))
}

// ============ GET /depth_time_contour ============

#[derive(Deserialize)]
struct ContourParams {
    lat: f64,
    lng: f64,
    start_date: String,
    end_date: String,
    variable: String,
}

/// Handler for `GET /depth_time_contour`.
async fn handle_contour(
    State(state): State<AppState>,
    Query(params): Query<ContourParams>,
) -> Result<Json<aggregate::ContourMatrix>, AppError> {
    let start = parse_date(&params.start_date, "start_date")?;
    let end = parse_date(&params.end_date, "end_date")?;

    let contour = aggregate::depth_time_contour(
        state.executor.as_ref(),
        state.config.grid.cell_size_degrees,
        params.lat,
        params.lng,
        start,
        end,
        &params.variable,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(contour))
}

// ============ GET /trajectories ============

#[derive(Serialize)]
struct TrajectoriesResponse {
    trajectories: Vec<aggregate::TrajectorySeries>,
}

/// Handler for `GET /trajectories`.
///
/// `argo_ids` may be repeated and/or comma-joined; the raw query pairs are
/// taken as-is so both forms normalize identically.
async fn handle_trajectories(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<TrajectoriesResponse>, AppError> {
    let raw_ids: Vec<String> = pairs
        .iter()
        .filter(|(key, _)| key == "argo_ids")
        .map(|(_, value)| value.clone())
        .collect();
    let ids = aggregate::normalize_ids(&raw_ids);

    let start = match pairs.iter().find(|(key, _)| key == "start_date") {
        Some((_, raw)) => Some(parse_date(raw, "start_date")?),
        None => None,
    };
    let end = match pairs.iter().find(|(key, _)| key == "end_date") {
        Some((_, raw)) => Some(parse_date(raw, "end_date")?),
        None => None,
    };

    let trajectories = aggregate::trajectories(state.executor.as_ref(), &ids, start, end)
        .await
        .map_err(classify_error)?;

    Ok(Json(TrajectoriesResponse { trajectories }))
}
