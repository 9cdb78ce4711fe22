use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::batch::JobSlot;
use crate::config::ServerConfig;
use crate::device::DeviceInfo;
use crate::transfer::TransferControl;
use catalog::Catalog;
use common::Source;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub config_path: PathBuf,
    pub config: Arc<RwLock<ServerConfig>>,
    pub device: Arc<RwLock<Option<DeviceInfo>>>,
    pub external_client: Client,
    pub transfer: Arc<TransferControl>,
    pub art_job: JobSlot,
    pub genre_art_job: JobSlot,
    pub scans: ScanGuards,
}

/// One in-flight scan per source. `begin` fails while another scan of the
/// same source is running; the guard releases on drop.
#[derive(Clone, Default)]
pub struct ScanGuards {
    local: Arc<RwLock<bool>>,
    device: Arc<RwLock<bool>>,
}

impl ScanGuards {
    pub fn begin(&self, source: Source) -> Option<ScanGuard> {
        let flag = self.flag(source);
        {
            let mut active = flag.write();
            if *active {
                return None;
            }
            *active = true;
        }
        Some(ScanGuard { flag })
    }

    pub fn is_active(&self, source: Source) -> bool {
        *self.flag(source).read()
    }

    fn flag(&self, source: Source) -> Arc<RwLock<bool>> {
        match source {
            Source::Local => Arc::clone(&self.local),
            Source::Device => Arc::clone(&self.device),
        }
    }
}

pub struct ScanGuard {
    flag: Arc<RwLock<bool>>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        *self.flag.write() = false;
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub direction: crate::transfer::Direction,
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub direction: crate::transfer::Direction,
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenreArtRequest {
    #[serde(default)]
    pub regenerate_all: bool,
}

#[derive(Debug, Deserialize)]
pub struct SettingRequest {
    pub value: String,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;
