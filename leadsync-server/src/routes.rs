//! Status surface for `serve`.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use leadsync_core::model::{BatchResult, LedgerStats, LimiterStatus, RunOutcome};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::errors::AppResult;

pub const HEALTH: &str = "/health";
pub const STATUS: &str = "/status";
pub const RUNS: &str = "/runs";

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH, get(health))
        .route(STATUS, get(status))
        .route(RUNS, post(trigger_run))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct LimiterView {
    pub name: String,
    pub available: u32,
    pub max: u32,
    pub wait_ms: u64,
}

impl From<LimiterStatus> for LimiterView {
    fn from(status: LimiterStatus) -> Self {
        Self {
            name: status.name,
            available: status.available,
            max: status.max,
            wait_ms: u64::try_from(status.wait.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub is_active: bool,
    pub limiters: Vec<LimiterView>,
    pub ledger: LedgerStats,
    pub last_run: Option<BatchResult>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<AppState>) -> AppResult<Json<StatusResponse>> {
    let pipeline = &state.pipeline;
    let ledger = pipeline.ledger_stats().await?;
    Ok(Json(StatusResponse {
        is_active: pipeline.is_active(),
        limiters: pipeline
            .limiter_status()
            .into_iter()
            .map(LimiterView::from)
            .collect(),
        ledger,
        last_run: state.last_run().await,
    }))
}

/// Runs a batch inline. `202` with the skip marker when one is already in
/// flight, `200` with the batch summary otherwise.
async fn trigger_run(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, Json<RunOutcome>)> {
    let outcome = state.trigger().await?;
    let status = if outcome.is_skipped() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}
