use std::path::Path;

use lofty::error::LoftyError;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use tracing::warn;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Tag metadata for one audio file. After `probe` the title/artist/album
/// fields are always populated, falling back to filename-derived defaults.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub track_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_secs: Option<f64>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Probe a file for tag metadata. Never fails: on any read or parse error
/// the filename becomes the title and the unknown-artist/album placeholders
/// are used, so one bad file can never abort a scan.
pub fn probe(path: &Path) -> TagInfo {
    let mut info = match read_tags(path) {
        Ok(info) => info,
        Err(err) => {
            warn!("Failed to read tags for {:?}: {}", path, err);
            TagInfo::default()
        }
    };

    if info.title.as_deref().map(str::trim).unwrap_or("").is_empty() {
        info.title = Some(file_stem(path));
    }
    if info.artist.as_deref().map(str::trim).unwrap_or("").is_empty() {
        info.artist = Some(UNKNOWN_ARTIST.to_string());
    }
    if info.album.as_deref().map(str::trim).unwrap_or("").is_empty() {
        info.album = Some(UNKNOWN_ALBUM.to_string());
    }
    info
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration = properties.duration().as_secs_f64();
    if duration > 0.0 {
        info.duration_secs = Some(duration);
    }

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = tag.get_string(&ItemKey::TrackTitle).map(|v| v.to_string());
        info.album = tag.get_string(&ItemKey::AlbumTitle).map(|v| v.to_string());
        let album_artist = tag.get_string(&ItemKey::AlbumArtist).map(|v| v.to_string());
        let track_artist = tag.get_string(&ItemKey::TrackArtist).map(|v| v.to_string());
        info.artist = track_artist.or(album_artist);
        info.track_no = tag.get_string(&ItemKey::TrackNumber).and_then(parse_u16);
        info.year = tag.get_string(&ItemKey::Year).and_then(parse_year);
        info.genre = tag
            .get_string(&ItemKey::Genre)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
    }

    Ok(info)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown Track".to_string())
}

fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_u16, parse_year, probe, UNKNOWN_ALBUM, UNKNOWN_ARTIST};
    use std::path::Path;

    #[test]
    fn probe_falls_back_to_filename_defaults() {
        let info = probe(Path::new("/nonexistent/My Song.mp3"));
        assert_eq!(info.title.as_deref(), Some("My Song"));
        assert_eq!(info.artist.as_deref(), Some(UNKNOWN_ARTIST));
        assert_eq!(info.album.as_deref(), Some(UNKNOWN_ALBUM));
        assert_eq!(info.duration_secs, None);
        assert_eq!(info.genre, None);
    }

    #[test]
    fn track_numbers_allow_total_suffix() {
        assert_eq!(parse_u16("3/12"), Some(3));
        assert_eq!(parse_u16(" 7 "), Some(7));
        assert_eq!(parse_u16("x"), None);
    }

    #[test]
    fn years_extract_leading_four_digits() {
        assert_eq!(parse_year("1994-06-01"), Some(1994));
        assert_eq!(parse_year("circa 2001"), Some(2001));
        assert_eq!(parse_year("none"), None);
    }
}
