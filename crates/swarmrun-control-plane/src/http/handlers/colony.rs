//! Colony snapshot handler.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};

use crate::state::AppState;

/// Point-in-time snapshot of the whole colony plus its counters.
pub async fn get_colony(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (stats, snapshot) = state.colony().snapshot_with_stats().await;
    Json(serde_json::json!({
        "stats": stats,
        "state": snapshot,
    }))
}
