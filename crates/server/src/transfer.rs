use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::resolve_library_root;
use crate::device::{pick_target_folder, random_track_name};
use crate::state::AppState;
use crate::utils::sanitize_component;
use catalog::{scan, Catalog};
use common::{join_relpath, Source, TrackRecord};

/// How long a paused loop sleeps before re-checking state, in case a wakeup
/// is missed.
const PAUSE_RECHECK: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    ToDevice,
    ToLocal,
}

impl Direction {
    pub fn source(&self) -> Source {
        match self {
            Direction::ToDevice => Source::Local,
            Direction::ToLocal => Source::Device,
        }
    }

    pub fn destination(&self) -> Source {
        match self {
            Direction::ToDevice => Source::Device,
            Direction::ToLocal => Source::Local,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferPhase {
    Idle,
    Running,
    Paused,
    Cancelling,
    Completed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TransferCounts {
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TransferFailure {
    pub id: String,
    pub error: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TransferProgress {
    pub phase: TransferPhase,
    pub direction: Option<Direction>,
    pub current: Option<String>,
    pub counts: TransferCounts,
    pub failures: Vec<TransferFailure>,
}

struct TransferInner {
    phase: TransferPhase,
    direction: Option<Direction>,
    current: Option<String>,
    counts: TransferCounts,
    failures: Vec<TransferFailure>,
}

/// Shared handle for the single transfer the system allows at a time. The
/// worker loop polls it at item boundaries; pause, resume and cancel only
/// flip state here and wake the loop.
pub struct TransferControl {
    inner: Mutex<TransferInner>,
    notify: Notify,
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferControl {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TransferInner {
                phase: TransferPhase::Idle,
                direction: None,
                current: None,
                counts: TransferCounts::default(),
                failures: Vec::new(),
            }),
            notify: Notify::new(),
        }
    }

    pub fn snapshot(&self) -> TransferProgress {
        let inner = self.inner.lock();
        TransferProgress {
            phase: inner.phase,
            direction: inner.direction,
            current: inner.current.clone(),
            counts: inner.counts,
            failures: inner.failures.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.inner.lock().phase,
            TransferPhase::Running | TransferPhase::Paused | TransferPhase::Cancelling
        )
    }

    pub fn try_begin(&self, direction: Direction, total: usize) -> bool {
        let mut inner = self.inner.lock();
        if matches!(
            inner.phase,
            TransferPhase::Running | TransferPhase::Paused | TransferPhase::Cancelling
        ) {
            return false;
        }
        *inner = TransferInner {
            phase: TransferPhase::Running,
            direction: Some(direction),
            current: None,
            counts: TransferCounts {
                total,
                ..TransferCounts::default()
            },
            failures: Vec::new(),
        };
        true
    }

    pub fn pause(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.phase != TransferPhase::Running {
            return false;
        }
        inner.phase = TransferPhase::Paused;
        true
    }

    pub fn resume(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.phase != TransferPhase::Paused {
            return false;
        }
        inner.phase = TransferPhase::Running;
        drop(inner);
        self.notify.notify_waiters();
        true
    }

    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        if !matches!(inner.phase, TransferPhase::Running | TransferPhase::Paused) {
            return false;
        }
        inner.phase = TransferPhase::Cancelling;
        drop(inner);
        self.notify.notify_waiters();
        true
    }

    fn set_current(&self, label: Option<String>) {
        self.inner.lock().current = label;
    }

    fn record(&self, id: &str, outcome: &ItemOutcome) {
        let mut inner = self.inner.lock();
        inner.counts.attempted += 1;
        match outcome {
            ItemOutcome::Copied => inner.counts.succeeded += 1,
            ItemOutcome::SkippedExisting => inner.counts.skipped += 1,
            ItemOutcome::Failed(error) => {
                inner.counts.failed += 1;
                inner.failures.push(TransferFailure {
                    id: id.to_string(),
                    error: error.clone(),
                });
            }
        }
    }

    fn finish(&self, cancelled: bool) -> TransferCounts {
        let mut inner = self.inner.lock();
        inner.phase = if cancelled {
            TransferPhase::Cancelled
        } else {
            TransferPhase::Completed
        };
        inner.current = None;
        inner.counts
    }

    /// Block at an item boundary while paused. Returns false once the
    /// transfer should stop instead of continuing.
    async fn wait_if_paused(&self) -> bool {
        loop {
            match self.inner.lock().phase {
                TransferPhase::Running => return true,
                TransferPhase::Cancelling => return false,
                TransferPhase::Paused => {}
                _ => return false,
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(PAUSE_RECHECK) => {}
            }
        }
    }
}

#[derive(Debug)]
enum ItemOutcome {
    Copied,
    SkippedExisting,
    Failed(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum TransferStartError {
    AlreadyRunning,
    NoDevice,
    NoLibraryRoot,
    NothingSelected,
}

impl std::fmt::Display for TransferStartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferStartError::AlreadyRunning => write!(f, "a transfer is already running"),
            TransferStartError::NoDevice => write!(f, "no device connected"),
            TransferStartError::NoLibraryRoot => write!(f, "library root is not configured"),
            TransferStartError::NothingSelected => write!(f, "no tracks selected"),
        }
    }
}

/// Validate preconditions, claim the transfer slot and spawn the worker.
pub fn start_transfer(
    state: AppState,
    direction: Direction,
    ids: Vec<String>,
) -> Result<(), TransferStartError> {
    if ids.is_empty() {
        return Err(TransferStartError::NothingSelected);
    }
    let mount = match state.device.read().as_ref() {
        Some(device) => device.mount.clone(),
        None => return Err(TransferStartError::NoDevice),
    };
    let config = state.config.read().clone();
    let library_root = resolve_library_root(&state.config_path, &config.library_root)
        .ok_or(TransferStartError::NoLibraryRoot)?;
    if !state.transfer.try_begin(direction, ids.len()) {
        return Err(TransferStartError::AlreadyRunning);
    }

    let control = Arc::clone(&state.transfer);
    let catalog = state.catalog.clone();
    tokio::spawn(async move {
        let counts =
            run_transfer(&catalog, &control, direction, &ids, &library_root, &mount).await;
        info!(
            "Transfer finished: {} attempted, {} copied, {} skipped, {} failed",
            counts.attempted, counts.succeeded, counts.skipped, counts.failed
        );
        if counts.succeeded > 0 {
            rescan_destination(&state, direction, &library_root, &mount).await;
        }
    });
    Ok(())
}

async fn rescan_destination(
    state: &AppState,
    direction: Direction,
    library_root: &Path,
    mount: &Path,
) {
    let destination = direction.destination();
    let _guard = match state.scans.begin(destination) {
        Some(guard) => guard,
        None => return,
    };
    let catalog = state.catalog.clone();
    let root = match destination {
        Source::Local => library_root.to_path_buf(),
        Source::Device => mount.to_path_buf(),
    };
    let result = tokio::task::spawn_blocking(move || match destination {
        Source::Local => scan::scan_local(&catalog, &root, false),
        Source::Device => scan::scan_device(&catalog, &root, false),
    })
    .await;
    match result {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!("Post-transfer rescan failed: {}", err),
        Err(err) => warn!("Post-transfer rescan join error: {}", err),
    }
}

/// Sequential copy loop. Checks for pause and cancel between items, never
/// mid-file; a cancelled transfer keeps everything already copied.
pub async fn run_transfer(
    catalog: &Catalog,
    control: &TransferControl,
    direction: Direction,
    ids: &[String],
    library_root: &Path,
    mount: &Path,
) -> TransferCounts {
    let mut cancelled = false;
    for id in ids {
        if !control.wait_if_paused().await {
            cancelled = true;
            break;
        }

        let record = match catalog.get_track(id) {
            Ok(Some(record)) if record.source == direction.source() => record,
            Ok(_) => {
                control.record(id, &ItemOutcome::Failed("unknown track".to_string()));
                continue;
            }
            Err(err) => {
                control.record(id, &ItemOutcome::Failed(err.to_string()));
                continue;
            }
        };

        control.set_current(Some(track_label(&record)));
        let outcome = copy_item(&record, direction, library_root, mount).await;
        if let ItemOutcome::Failed(error) = &outcome {
            warn!("Transfer of {} failed: {}", record.relpath, error);
        }
        control.record(id, &outcome);
    }
    control.finish(cancelled)
}

async fn copy_item(
    record: &TrackRecord,
    direction: Direction,
    library_root: &Path,
    mount: &Path,
) -> ItemOutcome {
    let source_path = match direction.source() {
        Source::Local => join_relpath(library_root, &record.relpath),
        Source::Device => join_relpath(mount, &record.relpath),
    };
    let dest_path = match direction {
        Direction::ToLocal => match local_destination(library_root, record) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        },
        Direction::ToDevice => match device_destination(mount, record) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        },
    };

    let result =
        tokio::task::spawn_blocking(move || copy_staged(&source_path, &dest_path)).await;
    match result {
        Ok(Ok(())) => ItemOutcome::Copied,
        Ok(Err(err)) => ItemOutcome::Failed(err.to_string()),
        Err(err) => ItemOutcome::Failed(err.to_string()),
    }
}

/// `{library}/{artist}/{album}/{NN - }{title}{ext}`, all components made
/// filesystem-safe. An existing file at that path means the song is already
/// in the library, which is a skip rather than a failure.
fn local_destination(library_root: &Path, record: &TrackRecord) -> Result<PathBuf, ItemOutcome> {
    let artist = sanitize_component(record.artist.as_deref().unwrap_or(metadata::UNKNOWN_ARTIST));
    let album = sanitize_component(record.album.as_deref().unwrap_or(metadata::UNKNOWN_ALBUM));
    let title = sanitize_component(record.title.as_deref().unwrap_or("Unknown Track"));

    let mut file_name = String::new();
    if let Some(track_no) = record.track_no {
        file_name.push_str(&format!("{:02} - ", track_no));
    }
    file_name.push_str(&title);
    if let Some(ext) = track_extension(record) {
        file_name.push('.');
        file_name.push_str(&ext);
    }

    let dest = library_root.join(artist).join(album).join(file_name);
    if dest.exists() {
        return Err(ItemOutcome::SkippedExisting);
    }
    Ok(dest)
}

fn device_destination(mount: &Path, record: &TrackRecord) -> Result<PathBuf, ItemOutcome> {
    let folder = match pick_target_folder(mount) {
        Ok(Some(folder)) => folder,
        Ok(None) => return Err(ItemOutcome::Failed("device is full".to_string())),
        Err(err) => return Err(ItemOutcome::Failed(err.to_string())),
    };
    let ext = track_extension(record).unwrap_or_else(|| "mp3".to_string());
    for _ in 0..16 {
        let candidate = folder.join(random_track_name(&ext));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(ItemOutcome::Failed(
        "could not allocate a device file name".to_string(),
    ))
}

fn track_extension(record: &TrackRecord) -> Option<String> {
    Path::new(&record.relpath)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

fn track_label(record: &TrackRecord) -> String {
    match (record.artist.as_deref(), record.title.as_deref()) {
        (Some(artist), Some(title)) => format!("{} - {}", artist, title),
        (None, Some(title)) => title.to_string(),
        _ => record.relpath.clone(),
    }
}

/// Copy through a `.part` sibling, verify the byte count, then rename into
/// place. A crash mid-copy leaves only the staging file behind.
fn copy_staged(source: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let part = staging_path(dest);
    let expected = fs::metadata(source)?.len();
    let copied = fs::copy(source, &part)?;
    if copied != expected {
        let _ = fs::remove_file(&part);
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("short copy: {} of {} bytes", copied, expected),
        ));
    }
    fs::rename(&part, dest)?;
    Ok(())
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|| "transfer".to_string());
    name.push_str(".part");
    dest.with_file_name(name)
}
