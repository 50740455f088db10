//! Application configuration management.
//!
//! Configuration is stored at `~/.config/spotcache/config.json`. The API
//! URL and login can be overridden from the environment (including a
//! `.env` file loaded by the binary).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "spotcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Default staleness window, in minutes, for lists and the profile.
const DEFAULT_STALE_MINUTES: u64 = 5;

/// Longest staleness window honoured; larger configured values are clamped.
pub const MAX_STALE_MINUTES: u64 = 7 * 24 * 60;

pub const ENV_API_URL: &str = "SPOTCACHE_API_URL";
pub const ENV_USERNAME: &str = "SPOTCACHE_USERNAME";
pub const ENV_PASSWORD: &str = "SPOTCACHE_PASSWORD";

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_stale_minutes() -> u64 {
    DEFAULT_STALE_MINUTES
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_stale_minutes")]
    pub list_stale_minutes: u64,
    #[serde(default = "default_stale_minutes")]
    pub profile_stale_minutes: u64,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            list_stale_minutes: DEFAULT_STALE_MINUTES,
            profile_stale_minutes: DEFAULT_STALE_MINUTES,
            last_username: None,
        }
    }
}

impl Config {
    /// Load from disk, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(ENV_API_URL).filter(|v| !v.is_empty()) {
            debug!(url = %url, "API URL overridden from environment");
            self.api_base_url = url;
        }
        if let Some(username) = var(ENV_USERNAME).filter(|v| !v.is_empty()) {
            self.last_username = Some(username);
        }
    }

    pub fn list_stale_time(&self) -> Duration {
        minutes(self.list_stale_minutes)
    }

    pub fn profile_stale_time(&self) -> Duration {
        minutes(self.profile_stale_minutes)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.min(MAX_STALE_MINUTES) * 60)
}
