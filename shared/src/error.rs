//! Error types for the shell core.

use std::path::PathBuf;

/// Failure reading or writing one of the persisted JSON files.
///
/// Callers decide the recovery policy: the window-state store falls back to
/// defaults, the download history backs the file up and starts over.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The file could not be read, written or renamed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not hold the expected JSON.
    #[error("cannot parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The value could not be serialised.
    #[error("cannot serialize: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Width or height was zero.
    #[error("invalid window bounds {width}x{height}")]
    InvalidBounds { width: u32, height: u32 },
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}

/// Failure anywhere in the update lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateError {
    /// The feed or asset host could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an unexpected status code.
    #[error("server returned status {0}")]
    Status(u16),

    /// The release feed was not valid JSON or lacked a version.
    #[error("invalid release feed: {0}")]
    Feed(String),

    /// Writing the downloaded payload failed.
    #[error("file error: {0}")]
    Io(String),

    /// Replacing the executable or relaunching failed.
    #[error("install failed: {0}")]
    Install(String),

    /// A download or install was requested with nothing to act on.
    #[error("no update is pending")]
    NothingPending,
}

impl UpdateError {
    /// Whether this failure is about connectivity rather than content.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Human-readable status line for the UI.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Update failed: could not reach the update server. \
                                 Check your internet connection and try again later."
                .to_owned(),
            other => format!("Update failed: {other}"),
        }
    }
}

/// Failure reported by the host windowing API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("window {0} does not exist")]
    UnknownWindow(u32),

    #[error("window creation failed: {0}")]
    Create(String),
}
