//! Bot configuration
//!
//! Read from a YAML file at startup. Every field has a default, so a missing
//! file or a partial one is fine.

use crate::blacklist::DEFAULT_SWEEP_INTERVAL_SECS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the config file
pub const CONFIG_FILE: &str = "config/bot.yaml";
/// Environment variable overriding [`CONFIG_FILE`]
pub const CONFIG_ENV: &str = "PLONK_CONFIG";

/// Bot configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Prefix for text commands
    pub command_prefix: String,
    /// Seconds between expiry sweeps
    pub sweep_interval_secs: u64,
    /// Where blacklist rules and known identities are stored
    pub rules_file: PathBuf,
    /// Where per-channel command block lists are stored
    pub command_blocklist_file: PathBuf,
    /// Directory for rotated log files
    pub log_dir: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_string(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            rules_file: PathBuf::from("data/blacklist.yaml"),
            command_blocklist_file: PathBuf::from("data/command_blocklist.yaml"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl BotConfig {
    /// Load the config from `$PLONK_CONFIG`, or [`CONFIG_FILE`] if unset
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| CONFIG_FILE.to_string());
        Self::load_from(path).await
    }

    /// Load the config from `path`, falling back to defaults if it doesn't exist
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_from(
        path: impl AsRef<Path>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(content) => Ok(serde_yaml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Period between expiry sweeps, never zero
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = BotConfig::default();
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.rules_file, PathBuf::from("data/blacklist.yaml"));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: BotConfig =
            serde_yaml::from_str("command_prefix: \"?\"\nsweep_interval_secs: 0\n").unwrap();
        assert_eq!(config.command_prefix, "?");
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.log_dir, PathBuf::from("logs"));
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BotConfig::load_from(dir.path().join("absent.yaml"))
            .await
            .unwrap();
        assert_eq!(config, BotConfig::default());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.yaml");
        std::fs::write(&path, "sweep_interval_secs: [soon").unwrap();
        assert!(BotConfig::load_from(&path).await.is_err());
    }
}
