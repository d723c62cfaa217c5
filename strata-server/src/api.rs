use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use strata::{
    ConsolidationSummary, EngineStatistics, IngestReport, SearchHit, SearchQuery, Stage,
    StageOverrides, StageReport,
};

use crate::models::{ActivityBatchRequest, ApiError, HealthResponse};
use crate::state::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        idle: state.engine.orchestrator().state().is_idle(),
    })
}

pub async fn record_activity(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ActivityBatchRequest>,
) -> Result<Json<IngestReport>, ApiError> {
    let report = state.engine.ingest(payload.events).await?;
    Ok(Json(report))
}

/// Run one stage; a stage-level failure still returns the report, with 503
pub async fn consolidate_stage(
    State(state): State<Arc<AppState>>,
    Path(stage): Path<String>,
    overrides: Option<Json<StageOverrides>>,
) -> Result<(StatusCode, Json<StageReport>), ApiError> {
    let stage: Stage = stage.parse()?;
    let overrides = overrides.map(|Json(o)| o).unwrap_or_default();

    let report = state.engine.consolidate(stage, &overrides).await;
    let status = if report.is_success() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(report)))
}

pub async fn consolidate_all(
    State(state): State<Arc<AppState>>,
    overrides: Option<Json<StageOverrides>>,
) -> Json<ConsolidationSummary> {
    let overrides = overrides.map(|Json(o)| o).unwrap_or_default();
    Json(state.engine.consolidate_all(&overrides).await)
}

pub async fn statistics(State(state): State<Arc<AppState>>) -> Json<EngineStatistics> {
    Json(state.engine.statistics().await)
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(query): Json<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let hits = state.engine.search(&query).await?;
    Ok(Json(hits))
}
