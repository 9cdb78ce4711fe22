use tracing::{info, warn};

use crate::config::resolve_library_root;
use crate::device::find_device;
use crate::state::AppState;
use catalog::scan::{scan_device, scan_local};
use common::Source;

/// Re-detect the device and reconcile both sides of the catalog. Each side
/// scans at most once at a time; a refresh during a running scan of the same
/// source is a no-op for that source.
pub fn start_refresh(state: AppState, force: bool) {
    refresh_device(&state);
    start_local_scan(state.clone(), force);
    start_device_scan(state, force);
}

pub fn refresh_device(state: &AppState) {
    let found = find_device();
    let mut guard = state.device.write();
    match (&*guard, &found) {
        (None, Some(device)) => info!("Device '{}' connected", device.name),
        (Some(_), None) => info!("Device disconnected"),
        _ => {}
    }
    *guard = found;
}

pub fn start_local_scan(state: AppState, force: bool) -> bool {
    let config = state.config.read().clone();
    let root = match resolve_library_root(&state.config_path, &config.library_root) {
        Some(root) if root.exists() => root,
        Some(root) => {
            warn!("Library root {:?} does not exist; skipping scan", root);
            return false;
        }
        None => {
            info!("Library root not configured yet; skipping scan");
            return false;
        }
    };
    let guard = match state.scans.begin(Source::Local) {
        Some(guard) => guard,
        None => return false,
    };

    tokio::spawn(async move {
        let _guard = guard;
        let catalog = state.catalog.clone();
        let result =
            tokio::task::spawn_blocking(move || scan_local(&catalog, &root, force)).await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!("Library scan failed: {}", err),
            Err(err) => warn!("Library scan join error: {}", err),
        }
    });
    true
}

pub fn start_device_scan(state: AppState, force: bool) -> bool {
    let mount = match state.device.read().as_ref() {
        Some(device) => device.mount.clone(),
        None => return false,
    };
    let guard = match state.scans.begin(Source::Device) {
        Some(guard) => guard,
        None => return false,
    };

    tokio::spawn(async move {
        let _guard = guard;
        let catalog = state.catalog.clone();
        let result =
            tokio::task::spawn_blocking(move || scan_device(&catalog, &mount, force)).await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!("Device scan failed: {}", err),
            Err(err) => warn!("Device scan join error: {}", err),
        }
    });
    true
}
