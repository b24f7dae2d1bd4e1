//! Per-user directories for Prism.
//!
//! Every directory can be overridden through an environment variable, which
//! is how tests and portable installs point the shell somewhere else:
//! `PRISM_CONFIG_DIR`, `PRISM_DATA_DIR` and `PRISM_DOWNLOAD_DIR`.

use std::path::PathBuf;

const APP_DIR: &str = "Prism";

pub const WINDOW_STATE_FILE: &str = "window-state.json";
pub const DOWNLOAD_HISTORY_FILE: &str = "downloads.json";
pub const CONFIG_FILE: &str = "config.json";

fn override_or(var: &str, fallback: impl FnOnce() -> PathBuf) -> PathBuf {
    match std::env::var_os(var) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => fallback(),
    }
}

/// Directory holding `config.json`.
pub fn config_dir() -> PathBuf {
    override_or("PRISM_CONFIG_DIR", || {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    })
}

/// Application-data directory: window state and download history.
pub fn data_dir() -> PathBuf {
    override_or("PRISM_DATA_DIR", || {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    })
}

/// Where finished transfers are saved.
pub fn download_dir() -> PathBuf {
    override_or("PRISM_DOWNLOAD_DIR", || {
        dirs::download_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

pub fn window_state_path() -> PathBuf {
    data_dir().join(WINDOW_STATE_FILE)
}

pub fn download_history_path() -> PathBuf {
    data_dir().join(DOWNLOAD_HISTORY_FILE)
}
