use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;

use crate::state::{AppState, TransferRequest};
use crate::transfer::{start_transfer, TransferProgress, TransferStartError};
use crate::utils::{json_error_response, json_ok_response};

pub async fn start(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Response {
    match start_transfer(state, request.direction, request.ids) {
        Ok(()) => json_ok_response(),
        Err(err @ TransferStartError::NothingSelected) => {
            json_error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        Err(err @ TransferStartError::AlreadyRunning) => {
            json_error_response(StatusCode::CONFLICT, err.to_string())
        }
        Err(err) => json_error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

pub async fn pause(State(state): State<AppState>) -> Response {
    if state.transfer.pause() {
        json_ok_response()
    } else {
        json_error_response(StatusCode::CONFLICT, "no running transfer to pause")
    }
}

pub async fn resume(State(state): State<AppState>) -> Response {
    if state.transfer.resume() {
        json_ok_response()
    } else {
        json_error_response(StatusCode::CONFLICT, "no paused transfer to resume")
    }
}

pub async fn cancel(State(state): State<AppState>) -> Response {
    if state.transfer.cancel() {
        json_ok_response()
    } else {
        json_error_response(StatusCode::CONFLICT, "no active transfer to cancel")
    }
}

pub async fn progress(State(state): State<AppState>) -> Json<TransferProgress> {
    Json(state.transfer.snapshot())
}
