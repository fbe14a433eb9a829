use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

use jobward_core::PRODUCER_VERSION;

use crate::app::errors::ApiError;

pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "producer_version": PRODUCER_VERSION })),
    )
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("no such route")
}
