//! Protocol exchange for remote workers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::{error, warn};

use swarmrun_proto::{decode, encode, AckStatus, Body};

use crate::http::responses::StatusResponse;
use crate::state::AppState;

/// Decode an envelope, let the queen answer it, and return the encoded reply.
///
/// Malformed envelopes get a 400 and never reach the colony. A capacity
/// rejection is still a valid envelope, returned with 429.
pub async fn exchange_message(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    let message = match decode(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "Rejected protocol message");
            return (
                StatusCode::BAD_REQUEST,
                Json(StatusResponse::rejected(
                    AckStatus::RejectedInvalid,
                    e.to_string(),
                )),
            )
                .into_response();
        }
    };

    let reply = state.queen.handle(message).await;
    let status = match reply.body() {
        Body::Ack(ack) if ack.status == AckStatus::RejectedCapacity => {
            StatusCode::TOO_MANY_REQUESTS
        }
        _ => StatusCode::OK,
    };

    match encode(&reply) {
        Ok(bytes) => (status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode reply");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
