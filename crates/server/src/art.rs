use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::batch::run_batched;
use crate::config::resolve_path;
use crate::state::AppState;
use crate::utils::sanitize_component;
use catalog::{now_ms, ArtEntry, GenreArtEntry};
use common::Source;
use metadata::{UNKNOWN_ALBUM, UNKNOWN_ARTIST};

pub const OPENROUTER_KEY_SETTING: &str = "openrouter_api_key";

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const OPENROUTER_MODEL: &str = "google/gemini-2.5-flash-image-preview";
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, PartialEq, Eq)]
pub enum ArtStartError {
    AlreadyRunning,
    MissingApiKey,
}

impl std::fmt::Display for ArtStartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtStartError::AlreadyRunning => write!(f, "a fetch is already running"),
            ArtStartError::MissingApiKey => write!(f, "openrouter_api_key is not set"),
        }
    }
}

pub fn album_art_key(artist: &str, album: &str) -> String {
    format!(
        "{}|||{}",
        artist.trim().to_lowercase(),
        album.trim().to_lowercase()
    )
}

pub fn art_file_name(artist: &str, album: &str) -> String {
    format!(
        "{}_{}.jpg",
        sanitize_component(artist),
        sanitize_component(album)
    )
}

pub fn genre_file_name(genre: &str) -> String {
    format!("{}.png", sanitize_component(&genre.trim().to_lowercase()))
}

/// Kick off a cover art sweep over every local album without a cached
/// outcome. Returns how many albums were queued.
pub fn start_art_fetch(state: AppState) -> Result<usize, ArtStartError> {
    let albums = match pending_albums(&state) {
        Ok(albums) => albums,
        Err(err) => {
            warn!("Failed to list albums for art fetch: {}", err);
            Vec::new()
        }
    };
    if !state.art_job.try_begin(albums.len()) {
        return Err(ArtStartError::AlreadyRunning);
    }
    let queued = albums.len();
    if queued == 0 {
        state.art_job.finish();
        return Ok(0);
    }

    let config = state.config.read().clone();
    let art_dir = resolve_path(&state.config_path, &config.art_cache_path);
    let concurrency = config.art_fetch_concurrency;
    let delay = Duration::from_millis(config.art_fetch_delay_ms);
    let timeout = Duration::from_secs(config.external_timeout_secs.max(1));
    let user_agent = config.musicbrainz_user_agent.clone();

    tokio::spawn(async move {
        info!("Fetching cover art for {} albums", queued);
        let results = run_batched(albums, concurrency, delay, |(artist, album)| {
            let state = state.clone();
            let art_dir = art_dir.clone();
            let user_agent = user_agent.clone();
            async move {
                let ok =
                    fetch_one_album(&state, &art_dir, &user_agent, timeout, &artist, &album).await;
                state.art_job.tick(ok);
                ok
            }
        })
        .await;
        state.art_job.finish();
        let found = results.iter().filter(|ok| **ok).count();
        info!("Cover art sweep finished: {}/{} found", found, queued);
    });
    Ok(queued)
}

fn pending_albums(state: &AppState) -> Result<Vec<(String, String)>, catalog::CatalogError> {
    let tracks = state.catalog.tracks_by_source(Source::Local)?;
    let mut albums: BTreeSet<(String, String)> = BTreeSet::new();
    for track in &tracks {
        let artist = track.artist.as_deref().unwrap_or("").trim();
        let album = track.album.as_deref().unwrap_or("").trim();
        if artist.is_empty() || album.is_empty() {
            continue;
        }
        if artist == UNKNOWN_ARTIST || album == UNKNOWN_ALBUM {
            continue;
        }
        albums.insert((artist.to_string(), album.to_string()));
    }

    let mut pending = Vec::new();
    for (artist, album) in albums {
        if state
            .catalog
            .get_art(&album_art_key(&artist, &album))?
            .is_none()
        {
            pending.push((artist, album));
        }
    }
    Ok(pending)
}

async fn fetch_one_album(
    state: &AppState,
    art_dir: &Path,
    user_agent: &str,
    timeout: Duration,
    artist: &str,
    album: &str,
) -> bool {
    let client = state.external_client.clone();
    let result = with_retries(RETRY_ATTEMPTS, RETRY_BASE_DELAY, || {
        fetch_album_art(&client, user_agent, timeout, artist, album)
    })
    .await;

    let key = album_art_key(artist, album);
    match result {
        Ok(Some(bytes)) => {
            let file_name = art_file_name(artist, album);
            let path = art_dir.join(&file_name);
            if let Err(err) = tokio::fs::create_dir_all(art_dir).await {
                warn!("Failed to create art directory: {}", err);
                return false;
            }
            if let Err(err) = tokio::fs::write(&path, &bytes).await {
                warn!("Failed to write art for {} - {}: {}", artist, album, err);
                return false;
            }
            let entry = ArtEntry {
                found: true,
                file_name: Some(file_name),
                checked_at_ms: now_ms(),
            };
            if let Err(err) = state.catalog.put_art(&key, &entry) {
                warn!("Failed to record art entry: {}", err);
            }
            true
        }
        Ok(None) => {
            let entry = ArtEntry {
                found: false,
                file_name: None,
                checked_at_ms: now_ms(),
            };
            if let Err(err) = state.catalog.put_art(&key, &entry) {
                warn!("Failed to record art miss: {}", err);
            }
            false
        }
        Err(err) => {
            // Out of retries. Record the miss so the next sweep moves on.
            warn!("Art fetch failed for {} - {}: {}", artist, album, err);
            let entry = ArtEntry {
                found: false,
                file_name: None,
                checked_at_ms: now_ms(),
            };
            if let Err(err) = state.catalog.put_art(&key, &entry) {
                warn!("Failed to record art miss: {}", err);
            }
            false
        }
    }
}

#[derive(Deserialize)]
struct ReleaseSearchResponse {
    #[serde(default)]
    releases: Vec<ReleaseEntry>,
}

#[derive(Deserialize)]
struct ReleaseEntry {
    id: String,
}

/// Look the album up on MusicBrainz, then pull the 500px front cover from
/// the Cover Art Archive. `Ok(None)` means the album has no cover there.
pub async fn fetch_album_art(
    client: &Client,
    user_agent: &str,
    timeout: Duration,
    artist: &str,
    album: &str,
) -> Result<Option<Bytes>, String> {
    let query = format!("release:\"{}\" AND artist:\"{}\"", album, artist);
    let response = client
        .get("https://musicbrainz.org/ws/2/release/")
        .query(&[("query", query.as_str()), ("fmt", "json"), ("limit", "1")])
        .header("User-Agent", user_agent)
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| err.to_string())?;
    if !response.status().is_success() {
        return Err(format!("musicbrainz http {}", response.status()));
    }
    let search: ReleaseSearchResponse = response.json().await.map_err(|err| err.to_string())?;
    let release_id = match search.releases.into_iter().next() {
        Some(release) => release.id,
        None => return Ok(None),
    };

    let url = format!(
        "https://coverartarchive.org/release/{}/front-500",
        release_id
    );
    let response = client
        .get(&url)
        .header("User-Agent", user_agent)
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| err.to_string())?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(format!("coverartarchive http {}", response.status()));
    }
    let bytes = response.bytes().await.map_err(|err| err.to_string())?;
    Ok(Some(bytes))
}

/// Kick off genre tile generation for every genre in the local library.
/// With `regenerate_all` the existing tiles are discarded first.
pub fn start_genre_art(state: AppState, regenerate_all: bool) -> Result<usize, ArtStartError> {
    let api_key = match state.catalog.get_setting(OPENROUTER_KEY_SETTING) {
        Ok(Some(key)) if !key.trim().is_empty() => key,
        _ => return Err(ArtStartError::MissingApiKey),
    };

    if regenerate_all {
        if let Err(err) = state.catalog.clear_genre_art() {
            warn!("Failed to clear genre art cache: {}", err);
        }
    }
    let genres = match pending_genres(&state) {
        Ok(genres) => genres,
        Err(err) => {
            warn!("Failed to list genres: {}", err);
            Vec::new()
        }
    };
    if !state.genre_art_job.try_begin(genres.len()) {
        return Err(ArtStartError::AlreadyRunning);
    }
    let queued = genres.len();
    if queued == 0 {
        state.genre_art_job.finish();
        return Ok(0);
    }

    let config = state.config.read().clone();
    let genre_dir = resolve_path(&state.config_path, &config.genre_art_path);
    let concurrency = config.genre_art_concurrency;
    let delay = Duration::from_millis(config.genre_art_delay_ms);
    let timeout = Duration::from_secs(config.external_timeout_secs.max(1) * 4);

    tokio::spawn(async move {
        info!("Generating art for {} genres", queued);
        let results = run_batched(genres, concurrency, delay, |genre| {
            let state = state.clone();
            let genre_dir = genre_dir.clone();
            let api_key = api_key.clone();
            async move {
                let ok = generate_one_genre(&state, &genre_dir, &api_key, timeout, &genre).await;
                state.genre_art_job.tick(ok);
                ok
            }
        })
        .await;
        state.genre_art_job.finish();
        let done = results.iter().filter(|ok| **ok).count();
        info!("Genre art sweep finished: {}/{} generated", done, queued);
    });
    Ok(queued)
}

fn pending_genres(state: &AppState) -> Result<Vec<String>, catalog::CatalogError> {
    let tracks = state.catalog.tracks_by_source(Source::Local)?;
    let mut genres: BTreeSet<String> = BTreeSet::new();
    for track in &tracks {
        if let Some(genre) = track.genre.as_deref() {
            let genre = genre.trim();
            if !genre.is_empty() {
                genres.insert(genre.to_lowercase());
            }
        }
    }

    let mut pending = Vec::new();
    for genre in genres {
        if state.catalog.get_genre_art(&genre)?.is_none() {
            pending.push(genre);
        }
    }
    Ok(pending)
}

async fn generate_one_genre(
    state: &AppState,
    genre_dir: &Path,
    api_key: &str,
    timeout: Duration,
    genre: &str,
) -> bool {
    let client = state.external_client.clone();
    let result = with_retries(RETRY_ATTEMPTS, RETRY_BASE_DELAY, || {
        generate_genre_image(&client, api_key, timeout, genre)
    })
    .await;

    match result {
        Ok(bytes) => {
            let file_name = genre_file_name(genre);
            let path = genre_dir.join(&file_name);
            if let Err(err) = tokio::fs::create_dir_all(genre_dir).await {
                warn!("Failed to create genre art directory: {}", err);
                return false;
            }
            if let Err(err) = tokio::fs::write(&path, &bytes).await {
                warn!("Failed to write genre art for '{}': {}", genre, err);
                return false;
            }
            let entry = GenreArtEntry {
                generated: true,
                file_name: Some(file_name),
                generated_at_ms: now_ms(),
            };
            if let Err(err) = state.catalog.put_genre_art(genre, &entry) {
                warn!("Failed to record genre art entry: {}", err);
            }
            true
        }
        Err(err) => {
            warn!("Genre art generation failed for '{}': {}", genre, err);
            let entry = GenreArtEntry {
                generated: false,
                file_name: None,
                generated_at_ms: now_ms(),
            };
            if let Err(err) = state.catalog.put_genre_art(genre, &entry) {
                warn!("Failed to record genre art miss: {}", err);
            }
            false
        }
    }
}

pub fn genre_prompt(genre: &str) -> String {
    format!(
        "Create a square album-cover style illustration that captures the \
         mood of the music genre \"{}\". Bold, iconic, no text, no words, \
         no lettering anywhere in the image.",
        genre
    )
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    images: Vec<ChatImage>,
}

#[derive(Deserialize)]
struct ChatImage {
    image_url: ChatImageUrl,
}

#[derive(Deserialize)]
struct ChatImageUrl {
    url: String,
}

/// Ask OpenRouter for one genre tile. The model returns the image inline as
/// a base64 data URL.
pub async fn generate_genre_image(
    client: &Client,
    api_key: &str,
    timeout: Duration,
    genre: &str,
) -> Result<Vec<u8>, String> {
    let body = json!({
        "model": OPENROUTER_MODEL,
        "messages": [{ "role": "user", "content": genre_prompt(genre) }],
        "modalities": ["image", "text"],
    });
    let response = client
        .post(OPENROUTER_URL)
        .bearer_auth(api_key)
        .json(&body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| err.to_string())?;
    if !response.status().is_success() {
        return Err(format!("openrouter http {}", response.status()));
    }
    let chat: ChatResponse = response.json().await.map_err(|err| err.to_string())?;
    let url = chat
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.images.into_iter().next())
        .map(|image| image.image_url.url)
        .ok_or_else(|| "no image in response".to_string())?;
    decode_data_url(&url)
}

pub fn decode_data_url(url: &str) -> Result<Vec<u8>, String> {
    let payload = url
        .split_once(";base64,")
        .map(|(_, data)| data)
        .ok_or_else(|| "not a base64 data url".to_string())?;
    BASE64
        .decode(payload.trim())
        .map_err(|err| format!("bad base64 payload: {}", err))
}

/// Retry with doubling delays: 1s after the first failure, 2s after the
/// second. The last error wins.
async fn with_retries<T, F, Fut>(attempts: u32, base_delay: Duration, mut call: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut delay = base_delay;
    let mut last_error = "no attempts made".to_string();
    for attempt in 0..attempts.max(1) {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_error = err;
                if attempt + 1 < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::{album_art_key, art_file_name, decode_data_url, genre_file_name, genre_prompt};

    #[test]
    fn art_keys_normalize_like_fingerprints() {
        assert_eq!(album_art_key(" Daft Punk ", "Discovery"), "daft punk|||discovery");
        assert_eq!(
            album_art_key("DAFT PUNK", "DISCOVERY"),
            album_art_key("daft punk", "discovery")
        );
    }

    #[test]
    fn art_files_are_filesystem_safe() {
        assert_eq!(art_file_name("AC/DC", "Back in Black"), "AC_DC_Back in Black.jpg");
        assert_eq!(genre_file_name("Drum & Bass"), "drum & bass.png");
    }

    #[test]
    fn data_urls_decode_to_raw_bytes() {
        let url = "data:image/png;base64,aGVsbG8=";
        assert_eq!(decode_data_url(url).unwrap(), b"hello");
        assert!(decode_data_url("https://example.com/a.png").is_err());
        assert!(decode_data_url("data:image/png;base64,!!!").is_err());
    }

    #[test]
    fn prompts_forbid_text_in_the_image() {
        let prompt = genre_prompt("shoegaze");
        assert!(prompt.contains("shoegaze"));
        assert!(prompt.contains("no text"));
    }
}
