//! Application configuration.
//!
//! Values are layered: built-in defaults, then `config.toml` under the user
//! config directory, then `OFFERTRACK_*` environment variables.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    cache::{CachePolicy, DEFAULT_ABSOLUTE_TTL, DEFAULT_SLIDING_TTL},
    models::DetailLevel,
    remote::fetcher::{DEFAULT_COOLDOWN, DEFAULT_SOURCE_URL},
};

const APP_DIR: &str = "offertrack";
const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "OFFERTRACK";

/// Durable backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local, lost on exit.
    Memory,
    /// A single JSON document on disk.
    #[default]
    File,
    /// Firebase-style realtime database over HTTP.
    Rest,
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Page URL template; `{month}` is replaced by the month token.
    pub source_url: String,
    /// Minimum spacing between two remote fetches, in seconds.
    pub cooldown_secs: u64,
    /// Hard cache lifetime, in seconds.
    pub cache_absolute_secs: u64,
    /// Idle cache lifetime, in seconds.
    pub cache_sliding_secs: u64,
    /// Backend kind.
    pub store: StoreKind,
    /// JSON file used by [`StoreKind::File`].
    pub store_path: PathBuf,
    /// Database root used by [`StoreKind::Rest`].
    pub store_url: Option<String>,
    /// Extraction mode when none is requested.
    pub default_detail: DetailLevel,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            cooldown_secs: DEFAULT_COOLDOWN.as_secs(),
            cache_absolute_secs: DEFAULT_ABSOLUTE_TTL.as_secs(),
            cache_sliding_secs: DEFAULT_SLIDING_TTL.as_secs(),
            store: StoreKind::default(),
            store_path: default_store_path(),
            store_url: None,
            default_detail: DetailLevel::default(),
        }
    }
}

impl AppConfig {
    /// Load from the default config file and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path(), true)
    }

    /// Load from `path`, optionally layering `OFFERTRACK_*` variables on top.
    /// A missing file is not an error.
    pub fn load_from(path: &Path, with_env: bool) -> Result<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::File::from(path.to_path_buf()).required(false));
        if with_env {
            builder = builder.add_source(::config::Environment::with_prefix(ENV_PREFIX));
        }

        let config: Self = builder
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?
            .try_deserialize()
            .context("invalid configuration")?;
        Ok(config)
    }

    /// Expiry settings for the month-level cache.
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            absolute: Duration::from_secs(self.cache_absolute_secs),
            sliding: Duration::from_secs(self.cache_sliding_secs),
        }
    }

    /// Spacing between remote fetches.
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Directory holding `config.toml`.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Default config file location.
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("games.json")
}

/// Write a default config file unless one already exists.
pub fn ensure_default_config() -> Result<PathBuf> {
    let path = config_path();
    write_config(&path, &AppConfig::default())?;
    Ok(path)
}

fn write_config(path: &Path, config: &AppConfig) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize configuration")?;
    fs::write(path, contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote default configuration to {}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.cooldown(), Duration::from_secs(10));
        assert_eq!(config.cache_policy(), CachePolicy::default());
        assert_eq!(config.store, StoreKind::File);
        assert_eq!(config.default_detail, DetailLevel::Short);
    }

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = AppConfig::load_from(&dir.path().join("absent.toml"), false)?;
        assert_eq!(config, AppConfig::default());
        Ok(())
    }

    #[test]
    fn default_file_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join(CONFIG_FILE);
        assert!(write_config(&path, &AppConfig::default())?);
        assert!(!write_config(&path, &AppConfig::default())?, "existing file is kept");

        let config = AppConfig::load_from(&path, false)?;
        assert_eq!(config, AppConfig::default());
        Ok(())
    }

    #[test]
    fn non_ascii_paths_survive_a_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(CONFIG_FILE);
        let config = AppConfig {
            store_path: PathBuf::from("/home/Jose\u{301}/games \"quoted\"\\archive.json"),
            store_url: Some("https://db.example.com/ñandú".to_string()),
            ..AppConfig::default()
        };
        assert!(write_config(&path, &config)?);

        assert_eq!(AppConfig::load_from(&path, false)?, config);
        Ok(())
    }

    #[test]
    fn file_values_override_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "cooldown_secs = 2\nstore = \"rest\"\nstore_url = \"http://localhost:9000\"\ndefault_detail = \"full\"\n",
        )?;

        let config = AppConfig::load_from(&path, false)?;
        assert_eq!(config.cooldown(), Duration::from_secs(2));
        assert_eq!(config.store, StoreKind::Rest);
        assert_eq!(config.store_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.default_detail, DetailLevel::Full);
        assert_eq!(config.source_url, DEFAULT_SOURCE_URL);
        Ok(())
    }
}
