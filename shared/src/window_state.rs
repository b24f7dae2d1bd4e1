//! Persisted window geometry.
//!
//! One JSON object, `{x, y, width, height, maximized}`, overwritten on every
//! resize, move and close of a tracked window and read once when a window is
//! created.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::error::PersistenceError;

/// Outer bounds of a window as the host reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub maximized: bool,
}

impl WindowState {
    pub fn from_bounds(bounds: Bounds, maximized: bool) -> Self {
        Self {
            x: Some(bounds.x),
            y: Some(bounds.y),
            width: bounds.width,
            height: bounds.height,
            maximized,
        }
    }

    fn validate(&self) -> Result<(), PersistenceError> {
        if self.width == 0 || self.height == 0 {
            return Err(PersistenceError::InvalidBounds {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// Size used when nothing was persisted, and the floor for restored sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDefaults {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for WindowDefaults {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for WindowDefaults {
    fn from(config: &AppConfig) -> Self {
        Self {
            width: config.default_width,
            height: config.default_height,
            min_width: config.min_width,
            min_height: config.min_height,
        }
    }
}

/// Geometry a new window should open with.
///
/// A position is only restored when both coordinates were saved.
pub fn resolve(saved: Option<&WindowState>, defaults: &WindowDefaults) -> WindowState {
    let Some(saved) = saved else {
        return WindowState {
            x: None,
            y: None,
            width: defaults.width.max(defaults.min_width),
            height: defaults.height.max(defaults.min_height),
            maximized: false,
        };
    };
    let (x, y) = match (saved.x, saved.y) {
        (Some(x), Some(y)) => (Some(x), Some(y)),
        _ => (None, None),
    };
    WindowState {
        x,
        y,
        width: saved.width.max(defaults.min_width),
        height: saved.height.max(defaults.min_height),
        maximized: saved.maximized,
    }
}

/// Single-record JSON store for [`WindowState`].
#[derive(Debug, Clone)]
pub struct WindowStateStore {
    path: PathBuf,
}

impl WindowStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<WindowState>, PersistenceError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };
        let state: WindowState =
            serde_json::from_str(&data).map_err(|e| PersistenceError::parse(&self.path, e))?;
        state.validate()?;
        Ok(Some(state))
    }

    /// Like [`load`](Self::load), but any failure means "nothing saved".
    pub fn load_or_none(&self) -> Option<WindowState> {
        match self.load() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("ignoring saved window state: {e}");
                None
            }
        }
    }

    /// Overwrite the file with `bounds`.
    ///
    /// The record goes to a sibling temp file first and is renamed into
    /// place, so a crash mid-write leaves the previous record intact.
    pub fn save(&self, bounds: Bounds, maximized: bool) -> Result<(), PersistenceError> {
        let state = WindowState::from_bounds(bounds, maximized);
        state.validate()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let data = serde_json::to_string(&state).map_err(PersistenceError::Serialize)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|e| PersistenceError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| PersistenceError::io(&self.path, e))?;
        tracing::trace!(?state, "window state saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(&self.path, e)),
        }
    }
}
