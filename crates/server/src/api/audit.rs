use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use modis_runner_core::audit::{Order, MAX_PAGE};
use modis_runner_core::{AuditFilter, AuditRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for the audit endpoint
#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub pass_id: Option<String>,
    /// One type or several, comma separated
    pub event_type: Option<String>,
    pub stage: Option<String>,
    /// Events at or after this timestamp (RFC 3339)
    pub from: Option<DateTime<Utc>>,
    /// Events at or before this timestamp (RFC 3339)
    pub to: Option<DateTime<Utc>>,
    /// "asc" for oldest first; newest first otherwise
    pub order: Option<String>,
    /// Default 100, capped at 1000
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Matching events ignoring limit and offset
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<AuditErrorResponse>);

/// Query audit events
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_PAGE);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut base_filter = AuditFilter::new();
    if let Some(ref pass_id) = params.pass_id {
        base_filter = base_filter.with_pass_id(pass_id);
    }
    if let Some(ref event_types) = params.event_type {
        for event_type in event_types.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            base_filter = base_filter.with_event_type(event_type);
        }
    }
    if let Some(ref stage) = params.stage {
        base_filter = base_filter.with_stage(stage);
    }
    if params.from.is_some() || params.to.is_some() {
        base_filter = base_filter.with_time_range(params.from, params.to);
    }

    let order = match params.order.as_deref() {
        Some("asc") => Order::OldestFirst,
        _ => Order::NewestFirst,
    };
    let query_filter = base_filter
        .clone()
        .with_order(order)
        .with_limit(limit)
        .with_offset(offset);

    let events = state.audit_store().query(&query_filter).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AuditErrorResponse {
                error: format!("Failed to query audit events: {}", e),
            }),
        )
    })?;

    let total = state.audit_store().count(&base_filter).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AuditErrorResponse {
                error: format!("Failed to count audit events: {}", e),
            }),
        )
    })?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit,
        offset,
    }))
}

#[derive(Debug, Serialize)]
pub struct PassHistoryResponse {
    pub pass_id: String,
    /// Oldest first
    pub events: Vec<AuditRecord>,
}

/// Recorded lifecycle of a pass, live or finished.
pub async fn pass_history(
    State(state): State<Arc<AppState>>,
    Path(pass_id): Path<String>,
) -> Result<Json<PassHistoryResponse>, ApiError> {
    let events = state.audit_store().pass_history(&pass_id).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AuditErrorResponse {
                error: format!("Failed to query pass history: {}", e),
            }),
        )
    })?;
    if events.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(AuditErrorResponse {
                error: format!("no recorded events for pass {}", pass_id),
            }),
        ));
    }
    Ok(Json(PassHistoryResponse { pass_id, events }))
}
