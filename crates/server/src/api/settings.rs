use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::state::{AppState, SettingRequest};
use crate::utils::{json_error_response, json_ok_response};

#[derive(Serialize)]
pub struct SettingResponse {
    pub key: String,
    pub set: bool,
}

/// Settings hold secrets (the OpenRouter key), so reads only confirm
/// presence, never the value.
pub async fn get_setting(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.catalog.get_setting(&key) {
        Ok(value) => Json(SettingResponse {
            key,
            set: value.map(|v| !v.trim().is_empty()).unwrap_or(false),
        })
        .into_response(),
        Err(err) => json_error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn set_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<SettingRequest>,
) -> Response {
    match state.catalog.set_setting(&key, request.value.trim()) {
        Ok(()) => json_ok_response(),
        Err(err) => json_error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}
