//! Trigger intake over HTTP.
//!
//! Messages are queued to the trigger listener; validation happens there and
//! rejections only show up in logs, metrics and the audit trail.

use axum::{extract::State, http::StatusCode, Json};
use modis_runner_core::RawMessage;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn submit_trigger(
    State(state): State<Arc<AppState>>,
    Json(message): Json<RawMessage>,
) -> (StatusCode, Json<TriggerResponse>) {
    match state.triggers().try_send(message) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(TriggerResponse {
                accepted: true,
                error: None,
            }),
        ),
        Err(e) => {
            let error = match e {
                TrySendError::Full(_) => "trigger queue is full",
                TrySendError::Closed(_) => "trigger listener is not running",
            };
            warn!("Rejected trigger: {}", error);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(TriggerResponse {
                    accepted: false,
                    error: Some(error.to_string()),
                }),
            )
        }
    }
}
