use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File extensions the scanner and transfer engine treat as audio.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "wav", "aac", "ogg", "flac"];

/// Device music tree, relative to the device mount root.
pub const DEVICE_MUSIC_DIR: &[&str] = &["iPod_Control", "Music"];
/// Device music folders are named F00..F49.
pub const DEVICE_FOLDER_PREFIX: char = 'F';
pub const DEVICE_FOLDER_COUNT: u32 = 50;
/// A device folder accepts at most this many files before the next is used.
pub const DEVICE_FOLDER_CAP: usize = 100;

const FINGERPRINT_SEP: &str = "|||";
const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Local,
    Device,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Local => "local",
            Source::Device => "device",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One indexed file. Tag fields stay `None` until the prober has run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    pub relpath: String,
    pub full_path: String,
    pub size: u64,
    pub modified_ms: u64,
    pub source: Source,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub track_no: Option<u16>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    pub indexed_at_ms: u64,
}

impl TrackRecord {
    pub fn fingerprint(&self) -> String {
        fingerprint(
            self.title.as_deref().unwrap_or(""),
            self.artist.as_deref().unwrap_or(""),
            self.album.as_deref().unwrap_or(""),
        )
    }
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Deterministic track identity. Device ids derive purely from the relative
/// path; local ids carry a prefix so the two sources can never collide.
pub fn track_id(source: Source, relpath: &str) -> String {
    match source {
        Source::Device => stable_id(relpath),
        Source::Local => format!("{}{}", LOCAL_ID_PREFIX, stable_id(relpath)),
    }
}

/// Heuristic song identity: normalized (title, artist, album). Blank fields
/// normalize like any other value, so two untagged files still match.
pub fn fingerprint(title: &str, artist: &str, album: &str) -> String {
    let mut out = String::new();
    out.push_str(&title.trim().to_lowercase());
    out.push_str(FINGERPRINT_SEP);
    out.push_str(&artist.trim().to_lowercase());
    out.push_str(FINGERPRINT_SEP);
    out.push_str(&album.trim().to_lowercase());
    out
}

pub fn is_audio_file(path: &Path) -> bool {
    let ext = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_ascii_lowercase(),
        None => return false,
    };
    AUDIO_EXTENSIONS.contains(&ext.as_str())
}

pub fn device_music_dir(device_root: &Path) -> PathBuf {
    let mut out = device_root.to_path_buf();
    for part in DEVICE_MUSIC_DIR {
        out.push(part);
    }
    out
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::{fingerprint, is_audio_file, track_id, Source};
    use std::path::Path;

    #[test]
    fn track_id_is_deterministic_and_source_scoped() {
        let device = track_id(Source::Device, "iPod_Control/Music/F00/ABCD.mp3");
        assert_eq!(
            device,
            track_id(Source::Device, "iPod_Control/Music/F00/ABCD.mp3")
        );
        let local = track_id(Source::Local, "iPod_Control/Music/F00/ABCD.mp3");
        assert_ne!(device, local);
        assert!(local.starts_with("local-"));
    }

    #[test]
    fn fingerprint_normalizes_case_and_whitespace() {
        assert_eq!(
            fingerprint(" Song ", "X", "Y"),
            fingerprint("song", " x ", "y")
        );
        assert_eq!(fingerprint("Song", "X", "Y"), "song|||x|||y");
    }

    #[test]
    fn blank_fields_still_fingerprint() {
        assert_eq!(fingerprint("", "", ""), "||||||");
        assert_eq!(fingerprint("  ", "", ""), fingerprint("", "", ""));
    }

    #[test]
    fn audio_extension_check_is_case_insensitive() {
        assert!(is_audio_file(Path::new("a/b/Track.MP3")));
        assert!(is_audio_file(Path::new("a/b/track.flac")));
        assert!(!is_audio_file(Path::new("a/b/cover.jpg")));
        assert!(!is_audio_file(Path::new("a/b/noext")));
    }
}
