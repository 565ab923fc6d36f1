use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_CONFIG_FILE: &str = "exambank.json";
pub const DEFAULT_DATABASE: &str = "database/questions.bin.gz";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

pub const ENV_CONFIG: &str = "EXAMBANK_CONFIG";
pub const ENV_DATABASE: &str = "EXAMBANK_DB";
pub const ENV_SYNC_URL: &str = "EXAMBANK_SYNC_URL";
pub const ENV_BIND: &str = "EXAMBANK_BIND";

/// Where to fetch the question sheet from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub url: Option<String>,
    /// Sent as the `username` query parameter when set.
    pub username: Option<String>,
    /// No timeout unless set.
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: PathBuf,
    pub bind: String,
    pub sync: SyncConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database: PathBuf::from(DEFAULT_DATABASE),
            bind: DEFAULT_BIND.to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read a config file. A missing file yields the defaults; a file that
    /// exists but cannot be read or parsed is an error.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no config file at {}, using defaults", path.display());
            return Ok(AppConfig::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from the file named by `EXAMBANK_CONFIG` (or `exambank.json`),
    /// then apply environment overrides.
    pub fn load() -> ConfigResult<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// [`AppConfig::load`] with a custom variable lookup.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let path = lookup(ENV_CONFIG).unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        let mut config = Self::from_file(path)?;
        config.apply_overrides(lookup);
        Ok(config)
    }

    /// Environment values win over file values. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(db) = get(ENV_DATABASE) {
            self.database = PathBuf::from(db);
        }
        if let Some(url) = get(ENV_SYNC_URL) {
            self.sync.url = Some(url);
        }
        if let Some(bind) = get(ENV_BIND) {
            self.bind = bind;
        }
    }
}
