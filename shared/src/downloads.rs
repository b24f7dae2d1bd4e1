//! Download history.
//!
//! Completed transfers are kept in a JSON array, newest first, capped at a
//! fixed number of entries. A history file that cannot be read is moved
//! aside as `<file>.bak.<unix-millis>` and replaced, so a corrupt log never
//! gets in the way of the download that triggered the write.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub name: String,
    pub path: String,
    /// Total size in bytes
    pub size: u64,
    /// RFC 3339 UTC timestamp of completion
    pub date: String,
}

impl DownloadRecord {
    /// A record stamped with the current time.
    pub fn completed_now(name: impl Into<String>, path: &Path, size: u64) -> Self {
        Self {
            name: name.into(),
            path: path.display().to_string(),
            size,
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadHistory {
    path: PathBuf,
    limit: usize,
}

impl DownloadHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<DownloadRecord>, PersistenceError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };
        serde_json::from_str(&data).map_err(|e| PersistenceError::parse(&self.path, e))
    }

    /// History for display; empty when the file is missing or unreadable.
    pub fn entries(&self) -> Vec<DownloadRecord> {
        self.load().unwrap_or_else(|e| {
            tracing::warn!("cannot read download history: {e}");
            Vec::new()
        })
    }

    /// Put `record` at the front and write the capped history back.
    pub fn record(&self, record: DownloadRecord) -> Result<(), PersistenceError> {
        let mut history = match self.load() {
            Ok(history) => history,
            Err(e) => {
                tracing::error!("error reading download history: {e}");
                self.back_up_corrupt();
                Vec::new()
            }
        };

        history.insert(0, record);
        history.truncate(self.limit);
        self.write(&history)
    }

    pub fn clear(&self) -> Result<(), PersistenceError> {
        self.write(&[])
    }

    fn write(&self, history: &[DownloadRecord]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let data = serde_json::to_string_pretty(history).map_err(PersistenceError::Serialize)?;
        fs::write(&self.path, data).map_err(|e| PersistenceError::io(&self.path, e))
    }

    fn back_up_corrupt(&self) {
        let mut backup = self.path.as_os_str().to_owned();
        backup.push(format!(".bak.{}", Utc::now().timestamp_millis()));
        let backup = PathBuf::from(backup);
        match fs::rename(&self.path, &backup) {
            Ok(()) => tracing::warn!("corrupted history file backed up to {}", backup.display()),
            Err(e) => tracing::error!("cannot back up corrupted history file: {e}"),
        }
    }
}

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Completed,
    Cancelled,
    Interrupted,
}

/// Callbacks from the host download manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Started {
        id: u64,
        filename: String,
        total_bytes: u64,
    },
    Updated {
        id: u64,
        received_bytes: u64,
        paused: bool,
    },
    Done {
        id: u64,
        state: DownloadState,
    },
}

#[derive(Debug)]
struct ActiveDownload {
    filename: String,
    save_path: PathBuf,
    total_bytes: u64,
}

/// Follows transfers from start to finish and records the completed ones.
#[derive(Debug)]
pub struct DownloadTracker {
    download_dir: PathBuf,
    history: DownloadHistory,
    active: HashMap<u64, ActiveDownload>,
}

impl DownloadTracker {
    pub fn new(download_dir: impl Into<PathBuf>, history: DownloadHistory) -> Self {
        Self {
            download_dir: download_dir.into(),
            history,
            active: HashMap::new(),
        }
    }

    pub fn history(&self) -> &DownloadHistory {
        &self.history
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Save path the host should write the transfer to.
    pub fn save_path_for(&self, filename: &str) -> PathBuf {
        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "download".to_owned());
        self.download_dir.join(name)
    }

    /// Returns the save path for a newly started transfer.
    pub fn handle_event(&mut self, event: DownloadEvent) -> Option<PathBuf> {
        match event {
            DownloadEvent::Started {
                id,
                filename,
                total_bytes,
            } => {
                let save_path = self.save_path_for(&filename);
                tracing::info!("downloading {filename} to {}", save_path.display());
                self.active.insert(
                    id,
                    ActiveDownload {
                        filename,
                        save_path: save_path.clone(),
                        total_bytes,
                    },
                );
                Some(save_path)
            }
            DownloadEvent::Updated {
                id,
                received_bytes,
                paused,
            } => {
                if let Some(item) = self.active.get(&id) {
                    if !paused {
                        tracing::debug!(
                            "downloading {} - {received_bytes}/{}",
                            item.filename,
                            item.total_bytes
                        );
                    }
                }
                None
            }
            DownloadEvent::Done { id, state } => {
                let Some(item) = self.active.remove(&id) else {
                    tracing::debug!(id, "completion for unknown download");
                    return None;
                };
                if state == DownloadState::Completed {
                    tracing::info!("download completed: {}", item.save_path.display());
                    let record = DownloadRecord::completed_now(
                        item.filename,
                        &item.save_path,
                        item.total_bytes,
                    );
                    if let Err(e) = self.history.record(record) {
                        tracing::error!("error writing download history: {e}");
                    }
                } else {
                    tracing::warn!("download failed ({state:?}): {}", item.filename);
                }
                None
            }
        }
    }
}
