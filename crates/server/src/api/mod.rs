pub mod art;
pub mod settings;
pub mod tracks;
pub mod transfer;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::batch::JobProgress;
use crate::device::DeviceInfo;
use crate::scan::start_refresh;
use crate::state::{AppState, HealthResponse, JsonResult};
use crate::transfer::TransferProgress;
use crate::utils::json_error;
use common::Source;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/refresh", post(refresh))
        .route("/library/tracks", get(tracks::list_local))
        .route("/device/tracks", get(tracks::list_device))
        .route("/duplicates", get(tracks::list_duplicates))
        .route("/duplicates/classify", post(tracks::classify_selection))
        .route("/transfer", post(transfer::start))
        .route("/transfer/pause", post(transfer::pause))
        .route("/transfer/resume", post(transfer::resume))
        .route("/transfer/cancel", post(transfer::cancel))
        .route("/transfer/progress", get(transfer::progress))
        .route("/art/fetch", post(art::start_fetch))
        .route("/art/status", get(art::fetch_status))
        .route("/art/:artist/:album", get(art::get_album_art))
        .route("/genre-art/generate", post(art::generate_genres))
        .route("/genre-art/status", get(art::genre_status))
        .route("/genre-art/:genre", get(art::get_genre_art))
        .route("/settings/:key", get(settings::get_setting))
        .route("/settings/:key", post(settings::set_setting))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
pub struct ScanActivity {
    pub local: bool,
    pub device: bool,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub device: Option<DeviceInfo>,
    pub local_tracks: usize,
    pub device_tracks: usize,
    pub scanning: ScanActivity,
    pub transfer: TransferProgress,
    pub art: JobProgress,
    pub genre_art: JobProgress,
}

async fn status(State(state): State<AppState>) -> JsonResult<StatusResponse> {
    let local_tracks = state
        .catalog
        .count_by_source(Source::Local)
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    let device_tracks = state
        .catalog
        .count_by_source(Source::Device)
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    Ok(Json(StatusResponse {
        device: state.device.read().clone(),
        local_tracks,
        device_tracks,
        scanning: ScanActivity {
            local: state.scans.is_active(Source::Local),
            device: state.scans.is_active(Source::Device),
        },
        transfer: state.transfer.snapshot(),
        art: state.art_job.snapshot(),
        genre_art: state.genre_art_job.snapshot(),
    }))
}

#[derive(Deserialize)]
struct RefreshQuery {
    #[serde(default)]
    force: bool,
}

async fn refresh(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
) -> impl IntoResponse {
    start_refresh(state, query.force);
    Json(HealthResponse { status: "ok" })
}
