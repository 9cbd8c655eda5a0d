//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, HTTP timeout and retry settings, and which backend holds the
//! stored session.
//!
//! Configuration is stored at `~/.config/courier/config.json`. The
//! `COURIER_API_URL` environment variable overrides the base URL.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::{ConfiguredStore, FileStore, KeyringStore};

/// Application name used for config/data/cache directory paths
const APP_NAME: &str = "courier";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`
pub const API_URL_ENV: &str = "COURIER_API_URL";

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8002/api";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;

const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;

/// Where the session token and profile are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// OS keychain
    #[default]
    Keyring,
    /// JSON file in the data directory
    File,
    /// Nothing survives a restart
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub store_backend: StoreBackend,
    pub max_rate_limit_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            store_backend: StoreBackend::default(),
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
        }
    }
}

impl Config {
    /// Load from the user config directory and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_api_url_override(std::env::var(API_URL_ENV).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            debug!(path = %path.display(), "Config loaded");
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Replace the base URL when `value` is set and not blank
    pub fn apply_api_url_override(&mut self, value: Option<String>) {
        if let Some(url) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            debug!(url = %url, "API base URL overridden from environment");
            self.api_base_url = url;
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Open the configured session store backend
    pub fn open_store(&self) -> Result<ConfiguredStore> {
        let store = match self.store_backend {
            StoreBackend::Keyring => ConfiguredStore::Keyring(KeyringStore::new(APP_NAME)),
            StoreBackend::File => ConfiguredStore::File(FileStore::in_dir(&self.data_dir()?)),
            StoreBackend::Memory => ConfiguredStore::Memory(Default::default()),
        };
        debug!(backend = ?self.store_backend, "Session store opened");
        Ok(store)
    }
}
