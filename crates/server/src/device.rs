use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::Serialize;
use tracing::info;

use common::{device_music_dir, DEVICE_FOLDER_CAP, DEVICE_FOLDER_COUNT, DEVICE_FOLDER_PREFIX};

#[derive(Clone, Debug, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub mount: PathBuf,
}

/// Scan the usual Linux automount locations for a mounted iPod. `/media`
/// nests mounts one level under the user name; `/mnt` holds them directly.
pub fn find_device() -> Option<DeviceInfo> {
    let mut candidates = Vec::new();
    if let Ok(users) = fs::read_dir("/media") {
        for user in users.filter_map(Result::ok) {
            if let Ok(mounts) = fs::read_dir(user.path()) {
                for mount in mounts.filter_map(Result::ok) {
                    candidates.push(mount.path());
                }
            }
        }
    }
    if let Ok(mounts) = fs::read_dir("/mnt") {
        for mount in mounts.filter_map(Result::ok) {
            candidates.push(mount.path());
        }
    }
    detect_device(&candidates)
}

pub fn detect_device(candidates: &[PathBuf]) -> Option<DeviceInfo> {
    for mount in candidates {
        if mount.join("iPod_Control").is_dir() {
            let name = mount
                .file_name()
                .map(|value| value.to_string_lossy().to_string())
                .unwrap_or_else(|| "iPod".to_string());
            info!("Found device '{}' at {:?}", name, mount);
            return Some(DeviceInfo {
                name,
                mount: mount.clone(),
            });
        }
    }
    None
}

/// First F-folder with room under the per-folder cap, created on demand.
/// Returns `None` when all fifty folders are full.
pub fn pick_target_folder(mount: &Path) -> io::Result<Option<PathBuf>> {
    let music_dir = device_music_dir(mount);
    for index in 0..DEVICE_FOLDER_COUNT {
        let folder = music_dir.join(format!("{}{:02}", DEVICE_FOLDER_PREFIX, index));
        if !folder.exists() {
            fs::create_dir_all(&folder)?;
            return Ok(Some(folder));
        }
        let count = fs::read_dir(&folder)?.filter_map(Result::ok).count();
        if count < DEVICE_FOLDER_CAP {
            return Ok(Some(folder));
        }
    }
    Ok(None)
}

/// Device files get short opaque names, the way iPod firmware expects.
pub fn random_track_name(ext: &str) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    let name: String = (0..4)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    if ext.is_empty() {
        name
    } else {
        format!("{}.{}", name, ext)
    }
}

#[cfg(test)]
mod tests {
    use super::{detect_device, pick_target_folder, random_track_name};
    use common::DEVICE_FOLDER_CAP;
    use std::fs;

    #[test]
    fn detection_requires_the_control_directory() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("usb-stick");
        let ipod = dir.path().join("IPOD");
        fs::create_dir_all(plain.join("DCIM")).unwrap();
        fs::create_dir_all(ipod.join("iPod_Control")).unwrap();

        let found = detect_device(&[plain.clone(), ipod.clone()]).unwrap();
        assert_eq!(found.mount, ipod);
        assert_eq!(found.name, "IPOD");

        assert!(detect_device(&[plain]).is_none());
    }

    #[test]
    fn full_folders_are_passed_over() {
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path();
        let f00 = mount.join("iPod_Control/Music/F00");
        fs::create_dir_all(&f00).unwrap();
        for i in 0..DEVICE_FOLDER_CAP {
            fs::write(f00.join(format!("{}.mp3", i)), b"x").unwrap();
        }

        let target = pick_target_folder(mount).unwrap().unwrap();
        assert!(target.ends_with("F01"));
        assert!(target.is_dir());
    }

    #[test]
    fn fresh_mount_starts_at_the_first_folder() {
        let dir = tempfile::tempdir().unwrap();
        let target = pick_target_folder(dir.path()).unwrap().unwrap();
        assert!(target.ends_with("F00"));
    }

    #[test]
    fn random_names_are_short_and_uppercase() {
        let name = random_track_name("mp3");
        assert_eq!(name.len(), 8);
        assert!(name.ends_with(".mp3"));
        assert!(name[..4].chars().all(|c| c.is_ascii_uppercase()));
    }
}
