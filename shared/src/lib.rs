//! Host-agnostic core of the Prism browser shell.
//!
//! - [`window_state`]: persisted window geometry
//! - [`window`]: active window registry and geometry tracking
//! - [`sequencer`]: the auto-update lifecycle
//! - [`updater`]: update client backed by a release feed
//! - [`downloads`]: download history
//! - [`notify`]: pushes to the rendering surface

pub mod config;
pub mod downloads;
pub mod error;
pub mod notify;
pub mod paths;
pub mod sequencer;
pub mod updater;
pub mod window;
pub mod window_state;

pub use config::{AppConfig, InstallPolicy};
pub use downloads::{DownloadEvent, DownloadHistory, DownloadRecord, DownloadState, DownloadTracker};
pub use error::{HostError, PersistenceError, UpdateError};
pub use notify::{ChannelNotifier, UiMessage, UiNotifier};
pub use sequencer::{UpdateClient, UpdatePhase, UpdateSequencer, UpdateSession, UpdaterEvent};
pub use window::{WindowEvent, WindowHost, WindowId, WindowKind, WindowTracker};
pub use window_state::{Bounds, WindowState, WindowStateStore};
