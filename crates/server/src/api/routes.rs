use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{audit, handlers, orchestrator, passes, triggers, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Trigger intake
        .route("/triggers", post(triggers::submit_trigger))
        // Passes
        .route("/passes", get(passes::list_passes))
        .route("/passes/{id}", get(passes::get_pass))
        .route("/passes/{id}/abort", post(passes::abort_pass))
        .route("/passes/{id}/history", get(audit::pass_history))
        // Orchestrator
        .route("/orchestrator/status", get(orchestrator::get_status))
        // Product stream
        .route("/ws", get(ws::ws_handler))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(super::middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
