use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    pub library_root: String,
    pub catalog_path: String,
    pub art_cache_path: String,
    pub genre_art_path: String,
    pub port: u16,
    pub musicbrainz_user_agent: String,
    pub external_timeout_secs: u64,
    pub art_fetch_concurrency: usize,
    pub art_fetch_delay_ms: u64,
    pub genre_art_concurrency: usize,
    pub genre_art_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            library_root: "".to_string(),
            catalog_path: "catalog.redb".to_string(),
            art_cache_path: "art".to_string(),
            genre_art_path: "genre_art".to_string(),
            port: 8888,
            musicbrainz_user_agent: "podbay/0.1 ( https://github.com/podbay/podbay )".to_string(),
            external_timeout_secs: 8,
            art_fetch_concurrency: 42,
            art_fetch_delay_ms: 300,
            genre_art_concurrency: 42,
            genre_art_delay_ms: 500,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("PODBAY_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServerConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.catalog_path.trim().is_empty() {
            config.catalog_path = "catalog.redb".to_string();
        }
        if config.art_cache_path.trim().is_empty() {
            config.art_cache_path = "art".to_string();
        }
        if config.genre_art_path.trim().is_empty() {
            config.genre_art_path = "genre_art".to_string();
        }
        if config.port == 0 {
            config.port = 8888;
        }
        if config.art_fetch_concurrency == 0 {
            config.art_fetch_concurrency = 42;
        }
        if config.genre_art_concurrency == 0 {
            config.genre_art_concurrency = 42;
        }
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_library_root(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::{load_or_create_config, resolve_path, ServerConfig};
    use std::path::Path;

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config.port, 8888);
        assert_eq!(config.art_fetch_concurrency, 42);

        let (reloaded, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(reloaded.port, config.port);
    }

    #[test]
    fn empty_paths_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = ServerConfig::default();
        config.catalog_path = " ".to_string();
        config.port = 0;
        super::save_config(&path, &config).unwrap();

        let (loaded, _) = load_or_create_config(&path).unwrap();
        assert_eq!(loaded.catalog_path, "catalog.redb");
        assert_eq!(loaded.port, 8888);
    }

    #[test]
    fn relative_paths_resolve_next_to_the_config() {
        let resolved = resolve_path(Path::new("/etc/podbay/config.yaml"), "catalog.redb");
        assert_eq!(resolved, Path::new("/etc/podbay/catalog.redb"));
        let absolute = resolve_path(Path::new("/etc/podbay/config.yaml"), "/var/lib/podbay.redb");
        assert_eq!(absolute, Path::new("/var/lib/podbay.redb"));
    }
}
