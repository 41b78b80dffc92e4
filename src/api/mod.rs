//! Thin HTTP adapter over the store and the pipeline.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::error::{ScrapeError, StoreError};
use crate::models::{Period, SalesQuery, SalesRecord, Segment, SortKey};
use crate::pipeline::{Pipeline, PipelineStats};
use crate::storage::Repository;

#[derive(Clone)]
pub struct ApiState {
    pub repo: Arc<Repository>,
    pub pipeline: Arc<Pipeline>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/sales", get(list_sales))
        .route("/api/sales/periods", get(list_periods))
        .route("/api/scraper/trigger", post(trigger_scrape))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Store(StoreError),
    Scrape(ScrapeError),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<ScrapeError> for ApiError {
    fn from(e: ScrapeError) -> Self {
        ApiError::Scrape(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Scrape(e @ ScrapeError::AlreadyRunning { .. }) => (StatusCode::CONFLICT, e.to_string()),
            ApiError::Scrape(e) => {
                error!("scrape failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Scraping failed. See logs.".to_string())
            }
            ApiError::Store(e) => {
                error!("store read failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesParams {
    pub period: Option<Period>,
    pub segment: Option<Segment>,
    pub min_sales: Option<i64>,
    #[serde(default)]
    pub exclude_new: bool,
    pub sort_by: Option<SortKey>,
}

impl From<SalesParams> for SalesQuery {
    fn from(p: SalesParams) -> Self {
        SalesQuery {
            period: p.period,
            segment: p.segment,
            min_sales: p.min_sales,
            exclude_new: p.exclude_new,
            sort_by: p.sort_by.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    pub period: Option<Period>,
    pub segment: Option<Segment>,
}

#[derive(Debug, Serialize)]
pub struct TriggerStats {
    pub processed: usize,
    pub period: Period,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub message: String,
    pub stats: TriggerStats,
}

impl From<PipelineStats> for TriggerResponse {
    fn from(s: PipelineStats) -> Self {
        TriggerResponse {
            message: "Scraping completed successfully".to_string(),
            stats: TriggerStats { processed: s.processed, period: s.period },
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_sales(
    State(state): State<ApiState>,
    Query(params): Query<SalesParams>,
) -> Result<Json<Vec<SalesRecord>>, ApiError> {
    let records = state.repo.query(&params.into())?;
    Ok(Json(records))
}

async fn list_periods(State(state): State<ApiState>) -> Result<Json<Vec<Period>>, ApiError> {
    Ok(Json(state.repo.list_periods()?))
}

async fn trigger_scrape(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<TriggerResponse>, ApiError> {
    // An empty body means "current month, both segments".
    let req: TriggerRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let period = req.period.unwrap_or_else(Period::current);
    let segments: Vec<Segment> = match req.segment {
        Some(s) => vec![s],
        None => Segment::ALL.to_vec(),
    };

    let processed = state.pipeline.run_segments(period, &segments).await?;
    Ok(Json(PipelineStats { period, processed }.into()))
}
