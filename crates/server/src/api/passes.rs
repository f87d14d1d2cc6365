//! Live pass inspection and manual abort.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use modis_runner_core::{
    OrchestratorError, Pass, PassId, PassReport, PassStatus, Platform,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

const DEFAULT_ABORT_REASON: &str = "aborted by operator";

/// Compact view of a live pass for listings.
#[derive(Debug, Serialize)]
pub struct PassSummary {
    pub id: PassId,
    pub platform: Platform,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orbit_number: Option<u32>,
    pub status: PassStatus,
    pub ready: bool,
    /// First stage not yet done, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    pub events_merged: u32,
    pub last_updated_at: DateTime<Utc>,
}

impl From<&Pass> for PassSummary {
    fn from(pass: &Pass) -> Self {
        Self {
            id: pass.id.clone(),
            platform: pass.platform,
            start_time: pass.start_time,
            orbit_number: pass.orbit_number,
            status: pass.status.clone(),
            ready: pass.is_ready(),
            current_stage: pass.current_stage().map(|s| s.name.clone()),
            events_merged: pass.events_merged,
            last_updated_at: pass.last_updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PassListResponse {
    pub passes: Vec<PassSummary>,
    pub total: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct AbortRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// List live passes, oldest first.
pub async fn list_passes(State(state): State<Arc<AppState>>) -> Json<PassListResponse> {
    let mut passes = state.tracker().list().await;
    passes.sort_by_key(|p| p.created_at);
    let passes: Vec<PassSummary> = passes.iter().map(PassSummary::from).collect();
    Json(PassListResponse {
        total: passes.len(),
        passes,
    })
}

/// Full state of one live pass.
pub async fn get_pass(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Pass>, ApiError> {
    state
        .tracker()
        .get(&PassId::from(id.as_str()))
        .await
        .map(Json)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("pass not found: {}", id)))
}

/// Abort a live pass. The body is optional.
pub async fn abort_pass(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<AbortRequest>>,
) -> Result<Json<PassReport>, ApiError> {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ABORT_REASON.to_string());

    match state
        .orchestrator()
        .abort(&PassId::from(id.as_str()), &reason)
        .await
    {
        Ok(report) => Ok(Json(report)),
        Err(e @ OrchestratorError::PassNotFound(_)) => {
            Err(error(StatusCode::NOT_FOUND, e.to_string()))
        }
        Err(e @ OrchestratorError::AlreadyFinished { .. }) => {
            Err(error(StatusCode::CONFLICT, e.to_string()))
        }
        Err(e) => Err(error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
