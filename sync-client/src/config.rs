//! Configuration loading for sync-client.
//!
//! Configuration is loaded from a TOML file (default: `chatsync.toml`).
//! Every section and field is optional.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use chatsync_core::Backoff;

/// Root configuration for a sync session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Local replica storage.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Paging and gap filling.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Upload scheduling.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Remote event log.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Cached media files.
    #[serde(default)]
    pub media: MediaConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Paging and gap-fill configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Versions fetched per gap page (default: 20).
    #[serde(default = "default_page_size")]
    pub gap_page_size: u32,
    /// Conversations/events per local page (default: 20).
    #[serde(default = "default_page_size")]
    pub page_limit: u32,
    /// Confirmed events kept per conversation by history backfill (default: 100).
    #[serde(default = "default_history_retention")]
    pub history_retention: u64,
}

/// Upload scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Retry backoff cap in seconds (default: 30).
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Only run uploads while connected (default: true).
    #[serde(default = "default_require_network")]
    pub require_network: bool,
    /// How long an upload waits for its acknowledgement to be applied,
    /// in milliseconds (default: 5000).
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

/// Remote event log configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the event log API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Media cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Directory holding cached image files.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("chatsync.db")
}

fn default_page_size() -> u32 {
    20
}

fn default_history_retention() -> u64 {
    100
}

fn default_max_backoff_secs() -> u64 {
    30
}

fn default_require_network() -> bool {
    true
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("media")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            gap_page_size: default_page_size(),
            page_limit: default_page_size(),
            history_retention: default_history_retention(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_backoff_secs: default_max_backoff_secs(),
            require_network: default_require_network(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
        }
    }
}

impl UploadConfig {
    /// Retry backoff derived from this section.
    pub fn backoff(&self) -> Backoff {
        Backoff::with_max_secs(self.max_backoff_secs)
    }

    /// Acknowledgement wait of one upload attempt.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl RemoteConfig {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
