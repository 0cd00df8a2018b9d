//! Configuration lookup for the CLI.

use anyhow::{Context, Result};
use std::path::Path;

use chatsync_client::Config;

/// Configuration file used when none is given.
const DEFAULT_CONFIG: &str = "chatsync.toml";

/// Load `path`, or `./chatsync.toml` when present, or the defaults.
///
/// An explicitly given file must exist.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).context("Failed to load configuration"),
        None => {
            let fallback = Path::new(DEFAULT_CONFIG);
            if fallback.exists() {
                Config::from_file(fallback).context("Failed to load configuration")
            } else {
                Ok(Config::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[storage]\ndatabase = \"alice.db\"\n").unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.storage.database, Path::new("alice.db"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
