use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::error;

use crate::models::{StreamsResponse, UnavailableResponse};
use crate::services;
use crate::state::AppState;

/// `GET /api/streams`. Any upstream failure degrades to 503 with an empty list.
pub async fn list_streams(State(ctx): State<AppState>) -> impl IntoResponse {
    match services::streams::list_live_streams(&ctx).await {
        Ok(streams) => (StatusCode::OK, Json(StreamsResponse { streams })).into_response(),
        Err(e) => {
            error!("[streams] Error fetching from MediaMTX: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(UnavailableResponse::media_server()),
            )
                .into_response()
        }
    }
}
