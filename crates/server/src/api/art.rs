use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::art::{album_art_key, start_art_fetch, start_genre_art, ArtStartError};
use crate::batch::JobProgress;
use crate::config::resolve_path;
use crate::state::{AppState, GenreArtRequest};
use crate::utils::json_error_response;

#[derive(Serialize)]
pub struct QueuedResponse {
    pub queued: usize,
}

pub async fn start_fetch(State(state): State<AppState>) -> Response {
    match start_art_fetch(state) {
        Ok(queued) => Json(QueuedResponse { queued }).into_response(),
        Err(err @ ArtStartError::AlreadyRunning) => {
            json_error_response(StatusCode::CONFLICT, err.to_string())
        }
        Err(err) => json_error_response(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

pub async fn fetch_status(State(state): State<AppState>) -> Json<JobProgress> {
    Json(state.art_job.snapshot())
}

pub async fn get_album_art(
    State(state): State<AppState>,
    Path((artist, album)): Path<(String, String)>,
) -> Response {
    let entry = match state.catalog.get_art(&album_art_key(&artist, &album)) {
        Ok(Some(entry)) => entry,
        Ok(None) => return json_error_response(StatusCode::NOT_FOUND, "no art for this album"),
        Err(err) => {
            return json_error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    };
    let file_name = match entry.file_name.filter(|_| entry.found) {
        Some(file_name) => file_name,
        None => return json_error_response(StatusCode::NOT_FOUND, "no art for this album"),
    };

    let config = state.config.read().clone();
    let path = resolve_path(&state.config_path, &config.art_cache_path).join(file_name);
    serve_image(&path, "image/jpeg").await
}

pub async fn generate_genres(
    State(state): State<AppState>,
    Json(request): Json<GenreArtRequest>,
) -> Response {
    match start_genre_art(state, request.regenerate_all) {
        Ok(queued) => Json(QueuedResponse { queued }).into_response(),
        Err(err @ ArtStartError::AlreadyRunning) => {
            json_error_response(StatusCode::CONFLICT, err.to_string())
        }
        Err(err @ ArtStartError::MissingApiKey) => {
            json_error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
    }
}

pub async fn genre_status(State(state): State<AppState>) -> Json<JobProgress> {
    Json(state.genre_art_job.snapshot())
}

pub async fn get_genre_art(
    State(state): State<AppState>,
    Path(genre): Path<String>,
) -> Response {
    let key = genre.trim().to_lowercase();
    let entry = match state.catalog.get_genre_art(&key) {
        Ok(Some(entry)) => entry,
        Ok(None) => return json_error_response(StatusCode::NOT_FOUND, "no art for this genre"),
        Err(err) => {
            return json_error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    };

    let file_name = match entry.file_name.filter(|_| entry.generated) {
        Some(file_name) => file_name,
        None => return json_error_response(StatusCode::NOT_FOUND, "no art for this genre"),
    };

    let config = state.config.read().clone();
    let path = resolve_path(&state.config_path, &config.genre_art_path).join(file_name);
    serve_image(&path, "image/png").await
}

async fn serve_image(path: &std::path::Path, content_type: &'static str) -> Response {
    match tokio::fs::read(path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        Err(_) => json_error_response(StatusCode::NOT_FOUND, "art file is missing"),
    }
}
