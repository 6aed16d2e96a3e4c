use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::application::{SchedulerStats, ServerQueries};
use crate::domain::{Endpoint, EndpointStatus, InvalidEndpoint, Sample};
use crate::ports::PersistenceError;

/// Error type that implements IntoResponse
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            AppError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<PersistenceError> for AppError {
    fn from(err: PersistenceError) -> Self {
        error!(error = %err, "Store query failed");
        AppError::Internal(err.to_string())
    }
}

impl From<InvalidEndpoint> for AppError {
    fn from(err: InvalidEndpoint) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub queries: ServerQueries,
    pub stats: Arc<SchedulerStats>,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl AppState {
    fn limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }
}

/// Response for /api/health
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub cycles: u64,
    pub overruns: u64,
    pub last_cycle_ms: u64,
}

/// Query params for /api/servers/{address}
#[derive(Debug, Deserialize)]
pub struct SamplesQuery {
    pub limit: Option<usize>,
}

/// Handler for GET /api/health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.stats.snapshot();
    Json(HealthResponse {
        status: "healthy",
        service: "mcwatch",
        cycles: stats.cycles,
        overruns: stats.overruns,
        last_cycle_ms: stats.last_cycle_ms,
    })
}

/// Handler for GET /api/servers
pub async fn servers_handler(State(state): State<AppState>) -> Result<Json<Vec<Endpoint>>, AppError> {
    Ok(Json(state.queries.list_endpoints().await?))
}

/// Handler for GET /api/latest
pub async fn latest_handler(State(state): State<AppState>) -> Result<Json<Vec<Sample>>, AppError> {
    Ok(Json(state.queries.latest_per_endpoint().await?))
}

/// Handler for GET /api/servers/{address}
pub async fn samples_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<SamplesQuery>,
) -> Result<Json<Vec<Sample>>, AppError> {
    let endpoint = Endpoint::parse(address)?;
    let limit = state.limit(params.limit);
    Ok(Json(state.queries.samples(&endpoint, limit).await?))
}

/// Handler for GET /api/servers/{address}/latest
pub async fn latest_sample_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Sample>, AppError> {
    let endpoint = Endpoint::parse(address)?;
    state
        .queries
        .latest_sample(&endpoint)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no samples recorded for {endpoint}")))
}

/// Handler for GET /api/servers/{address}/status
pub async fn status_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<EndpointStatus>, AppError> {
    let endpoint = Endpoint::parse(address)?;
    state
        .queries
        .current_status(&endpoint)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no status recorded for {endpoint}")))
}
