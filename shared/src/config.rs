use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::paths;

/// When a downloaded update gets installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InstallPolicy {
    /// Restart and install as soon as the download finishes.
    Immediate,
    /// Give the user a short countdown, then restart and install.
    AfterDelay { secs: u64 },
    /// Install when the application quits.
    OnQuit,
}

impl Default for InstallPolicy {
    fn default() -> Self {
        Self::AfterDelay { secs: 3 }
    }
}

/// Application configuration stored in JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_auto_update")]
    pub auto_update: bool,
    #[serde(default)]
    pub install_policy: InstallPolicy,
    /// Delay between startup and the first update check
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    /// Release asset that carries the executable for this platform
    #[serde(default = "default_asset_name")]
    pub asset_name: String,
    #[serde(default = "default_width")]
    pub default_width: u32,
    #[serde(default = "default_height")]
    pub default_height: u32,
    #[serde(default = "default_min_width")]
    pub min_width: u32,
    #[serde(default = "default_min_height")]
    pub min_height: u32,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_auto_update() -> bool {
    true
}

fn default_settle_delay_secs() -> u64 {
    5
}

fn default_feed_url() -> String {
    "https://api.github.com/repos/PrimeX/prism/releases/latest".into()
}

fn default_asset_name() -> String {
    if cfg!(target_os = "windows") {
        "prism.exe".into()
    } else {
        format!("prism-{}-{}", std::env::consts::OS, std::env::consts::ARCH)
    }
}

fn default_width() -> u32 {
    1400
}

fn default_height() -> u32 {
    900
}

fn default_min_width() -> u32 {
    800
}

fn default_min_height() -> u32 {
    600
}

fn default_history_limit() -> usize {
    100
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auto_update: default_auto_update(),
            install_policy: InstallPolicy::default(),
            settle_delay_secs: default_settle_delay_secs(),
            feed_url: default_feed_url(),
            asset_name: default_asset_name(),
            default_width: default_width(),
            default_height: default_height(),
            min_width: default_min_width(),
            min_height: default_min_height(),
            history_limit: default_history_limit(),
        }
    }
}

impl AppConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

pub fn load_config() -> AppConfig {
    load_config_from(&paths::config_path())
}

/// Missing or unreadable files yield the defaults.
pub fn load_config_from(path: &Path) -> AppConfig {
    if !path.exists() {
        return AppConfig::default();
    }
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!("cannot read config {}: {e}", path.display());
            return AppConfig::default();
        }
    };
    serde_json::from_str(&data).unwrap_or_else(|e| {
        tracing::warn!("ignoring malformed config {}: {e}", path.display());
        AppConfig::default()
    })
}

pub fn save_config(config: &AppConfig) {
    save_config_to(config, &paths::config_path());
}

pub fn save_config_to(config: &AppConfig, path: &Path) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let data = serde_json::to_string_pretty(config).unwrap_or_default();
    if let Err(e) = fs::write(path, data) {
        tracing::warn!("cannot write config {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_match_reference_window() {
        let config = AppConfig::default();
        assert_eq!((config.default_width, config.default_height), (1400, 900));
        assert_eq!((config.min_width, config.min_height), (800, 600));
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.settle_delay(), Duration::from_secs(5));
        assert_eq!(config.install_policy, InstallPolicy::AfterDelay { secs: 3 });
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"auto_update": false, "install_policy": {"mode": "on_quit"}}"#)
            .unwrap();

        let config = load_config_from(&path);
        assert!(!config.auto_update);
        assert_eq!(config.install_policy, InstallPolicy::OnQuit);
        assert_eq!(config.default_width, 1400);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(load_config_from(&path), AppConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = AppConfig {
            install_policy: InstallPolicy::Immediate,
            settle_delay_secs: 1,
            ..AppConfig::default()
        };
        save_config_to(&config, &path);
        assert_eq!(load_config_from(&path), config);
    }
}
