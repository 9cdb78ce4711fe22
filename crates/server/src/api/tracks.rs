use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::dedup::{classify, duplicate_pairs, Classification, DuplicatePair, FingerprintIndex};
use crate::state::{AppState, ClassifyRequest, JsonResult, ListResponse};
use crate::utils::json_error;
use common::{Source, TrackRecord};

pub async fn list_local(State(state): State<AppState>) -> JsonResult<ListResponse<TrackRecord>> {
    list_tracks(&state, Source::Local)
}

pub async fn list_device(State(state): State<AppState>) -> JsonResult<ListResponse<TrackRecord>> {
    list_tracks(&state, Source::Device)
}

fn list_tracks(state: &AppState, source: Source) -> JsonResult<ListResponse<TrackRecord>> {
    let items = state
        .catalog
        .tracks_by_source(source)
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

/// Songs present on both sides, paired by fingerprint.
pub async fn list_duplicates(
    State(state): State<AppState>,
) -> JsonResult<ListResponse<DuplicatePair>> {
    let local = state
        .catalog
        .tracks_by_source(Source::Local)
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    let device = state
        .catalog
        .tracks_by_source(Source::Device)
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    let items = duplicate_pairs(&local, &device);
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

/// Pre-transfer check: which of the selected tracks already exist on the
/// other side.
pub async fn classify_selection(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> JsonResult<Classification> {
    let source_tracks = state
        .catalog
        .tracks_by_source(request.direction.source())
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    let destination_tracks = state
        .catalog
        .tracks_by_source(request.direction.destination())
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    let index = FingerprintIndex::build(&destination_tracks);
    Ok(Json(classify(&source_tracks, &request.ids, &index)))
}
