//! HTTP server for the control plane.
//!
//! Provides endpoints for:
//! - Task control (`/v1/tasks`)
//! - Worker roster (`/v1/workers`)
//! - Colony snapshot (`/v1/colony`)
//! - Protocol exchange for remote workers (`/v1/messages`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Remote control
        .route("/v1/tasks", post(handlers::enqueue_task))
        .route("/v1/tasks/:id", get(handlers::get_task))
        .route("/v1/tasks/:id/cancel", post(handlers::cancel_task))
        .route("/v1/workers", get(handlers::list_workers))
        .route("/v1/workers/:id", delete(handlers::deregister_worker))
        .route("/v1/colony", get(handlers::get_colony))
        // Worker protocol
        .route("/v1/messages", post(handlers::exchange_message))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
