use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// Keep running memory-only for the session if the database cannot be opened.
    #[serde(default = "default_fallback_to_memory")]
    pub fallback_to_memory: bool,
}

fn default_sqlite_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inspection-sync")
        .join("inspections.db")
}

fn default_fallback_to_memory() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            fallback_to_memory: default_fallback_to_memory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Backoff before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on the backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Failed attempts after which an edit is dropped and reported.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Period of the timer-driven drain cycle, in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_interval_secs() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_remote_endpoint() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_remote_timeout_secs() -> u64 {
    15
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: default_remote_endpoint(),
            api_key: None,
            timeout_secs: default_remote_timeout_secs(),
        }
    }
}

impl Config {
    /// Load from the default location, writing a default file if none exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("inspection-sync")
    }

    /// `INSPECTION_SYNC_CONFIG` overrides the default location.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("INSPECTION_SYNC_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let sync = SyncConfig::default();
        assert_eq!(sync.initial_delay_ms, 1_000);
        assert_eq!(sync.max_delay_ms, 60_000);
        assert_eq!(sync.max_retries, 5);
        assert_eq!(sync.interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [sync]
            max_retries = 3

            [remote]
            endpoint = "https://sync.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.initial_delay_ms, 1_000);
        assert_eq!(config.remote.endpoint, "https://sync.example.com");
        assert_eq!(config.remote.timeout_secs, 15);
        assert!(config.database.fallback_to_memory);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.remote.api_key = Some("secret".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.remote.api_key.as_deref(), Some("secret"));
        assert_eq!(loaded.database.sqlite_path, config.database.sqlite_path);
    }
}
