use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use common::{
    device_music_dir, is_audio_file, relpath_from, track_id, Source, TrackRecord,
    DEVICE_FOLDER_COUNT, DEVICE_FOLDER_PREFIX,
};
use metadata::probe;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{now_ms, Catalog, CatalogError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files_seen: usize,
    pub indexed: usize,
    pub skipped_unchanged: usize,
    pub removed: usize,
}

#[derive(Clone, Debug)]
pub struct ScanOutcome {
    pub stats: ScanStats,
    /// The source's records as persisted, read back after the reconcile.
    pub tracks: Vec<TrackRecord>,
}

/// Walk the library root and reconcile the catalog's local records with what
/// is on disk. Unchanged files (same size and mtime) keep their existing
/// record untouched unless `force` is set; vanished files are purged.
pub fn scan_local(catalog: &Catalog, root: &Path, force: bool) -> Result<ScanOutcome, CatalogError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable directory entry: {}", err);
                continue;
            }
        };
        if entry.file_type().is_file() && is_audio_file(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    scan_tree(catalog, root, Source::Local, &files, force)
}

/// Reconcile the catalog's device records with the device's music tree. Only
/// files inside the numbered F-folders count; anything else under the mount
/// is ignored.
pub fn scan_device(
    catalog: &Catalog,
    mount_root: &Path,
    force: bool,
) -> Result<ScanOutcome, CatalogError> {
    let music_dir = device_music_dir(mount_root);
    let mut files = Vec::new();
    for index in 0..DEVICE_FOLDER_COUNT {
        let folder = music_dir.join(format!("{}{:02}", DEVICE_FOLDER_PREFIX, index));
        let entries = match fs::read_dir(&folder) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_file() && is_audio_file(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    scan_tree(catalog, mount_root, Source::Device, &files, force)
}

fn scan_tree(
    catalog: &Catalog,
    record_root: &Path,
    source: Source,
    files: &[PathBuf],
    force: bool,
) -> Result<ScanOutcome, CatalogError> {
    let mut existing: HashMap<String, TrackRecord> = HashMap::new();
    for track in catalog.tracks_by_source(source)? {
        existing.insert(track.id.clone(), track);
    }

    let mut stats = ScanStats::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut batch = Vec::new();

    for path in files {
        let relpath = match relpath_from(record_root, path) {
            Some(relpath) => relpath,
            None => continue,
        };
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                warn!("Skipping unreadable file {:?}: {}", path, err);
                continue;
            }
        };

        stats.files_seen += 1;
        let id = track_id(source, &relpath);
        let size = meta.len();
        let modified_ms = file_mtime_ms(&meta);
        seen.insert(id.clone());

        if !force {
            if let Some(prev) = existing.get(&id) {
                if prev.size == size && prev.modified_ms == modified_ms {
                    stats.skipped_unchanged += 1;
                    continue;
                }
            }
        }

        let tags = probe(path);
        batch.push(TrackRecord {
            id,
            relpath,
            full_path: path.to_string_lossy().to_string(),
            size,
            modified_ms,
            source,
            title: tags.title,
            artist: tags.artist,
            album: tags.album,
            genre: tags.genre,
            track_no: tags.track_no,
            year: tags.year,
            duration_secs: tags.duration_secs,
            indexed_at_ms: now_ms(),
        });
        stats.indexed += 1;
    }

    catalog.upsert_tracks(&batch)?;
    stats.removed = catalog.retain_source(source, &seen)?;

    info!(
        "Scanned {} ({}): {} files, {} indexed, {} unchanged, {} removed",
        record_root.display(),
        source,
        stats.files_seen,
        stats.indexed,
        stats.skipped_unchanged,
        stats.removed
    );
    let tracks = catalog.tracks_by_source(source)?;
    Ok(ScanOutcome { stats, tracks })
}

fn file_mtime_ms(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{scan_device, scan_local};
    use crate::Catalog;
    use common::Source;
    use std::fs;
    use std::path::Path;

    fn write_file(path: &Path, bytes: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn local_scan_is_incremental_on_unchanged_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        write_file(&root.join("Artist/Album/01 - One.mp3"), b"not real audio");
        write_file(&root.join("Artist/Album/02 - Two.mp3"), b"also not audio");
        write_file(&root.join("Artist/Album/cover.jpg"), b"jpeg");

        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();

        let first = scan_local(&catalog, &root, false).unwrap();
        assert_eq!(first.stats.files_seen, 2);
        assert_eq!(first.stats.indexed, 2);
        assert_eq!(first.stats.removed, 0);
        assert_eq!(first.tracks.len(), 2);

        let before: Vec<u64> = first.tracks.iter().map(|t| t.indexed_at_ms).collect();

        let second = scan_local(&catalog, &root, false).unwrap();
        assert_eq!(second.stats.indexed, 0);
        assert_eq!(second.stats.skipped_unchanged, 2);

        let after: Vec<u64> = second.tracks.iter().map(|t| t.indexed_at_ms).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn forced_scan_reprobes_unchanged_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        write_file(&root.join("a.mp3"), b"x");

        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        scan_local(&catalog, &root, false).unwrap();
        let forced = scan_local(&catalog, &root, true).unwrap();
        assert_eq!(forced.stats.indexed, 1);
        assert_eq!(forced.stats.skipped_unchanged, 0);
    }

    #[test]
    fn local_scan_purges_vanished_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        let doomed = root.join("Artist/Album/gone.mp3");
        write_file(&doomed, b"x");
        write_file(&root.join("Artist/Album/stays.mp3"), b"y");

        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        scan_local(&catalog, &root, false).unwrap();
        assert_eq!(catalog.count_by_source(Source::Local).unwrap(), 2);

        fs::remove_file(&doomed).unwrap();
        let outcome = scan_local(&catalog, &root, false).unwrap();
        assert_eq!(outcome.stats.removed, 1);
        assert_eq!(outcome.tracks.len(), 1);
        assert_eq!(catalog.count_by_source(Source::Local).unwrap(), 1);
    }

    #[test]
    fn device_scan_only_sees_numbered_folders() {
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path().join("ipod");
        write_file(&mount.join("iPod_Control/Music/F00/ABCD.mp3"), b"a");
        write_file(&mount.join("iPod_Control/Music/F49/WXYZ.m4a"), b"b");
        write_file(&mount.join("iPod_Control/Music/stray.mp3"), b"c");
        write_file(&mount.join("iPod_Control/Music/F00/notes.txt"), b"d");
        write_file(&mount.join("Podcasts/episode.mp3"), b"e");

        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        let outcome = scan_device(&catalog, &mount, false).unwrap();
        assert_eq!(outcome.stats.files_seen, 2);
        assert_eq!(outcome.stats.indexed, 2);

        let mut relpaths: Vec<&str> = outcome.tracks.iter().map(|t| t.relpath.as_str()).collect();
        relpaths.sort();
        assert_eq!(
            relpaths,
            vec![
                "iPod_Control/Music/F00/ABCD.mp3",
                "iPod_Control/Music/F49/WXYZ.m4a"
            ]
        );
    }

    #[test]
    fn device_scan_on_empty_mount_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path().join("ipod");
        fs::create_dir_all(&mount).unwrap();

        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        let outcome = scan_device(&catalog, &mount, false).unwrap();
        assert_eq!(outcome.stats.files_seen, 0);
        assert!(outcome.tracks.is_empty());
        assert_eq!(catalog.count_by_source(Source::Device).unwrap(), 0);
    }
}
