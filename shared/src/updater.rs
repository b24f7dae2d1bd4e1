// HTTP update client against a GitHub-style `releases/latest` feed

use serde::Deserialize;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::UpdateError;
use crate::sequencer::{UpdateClient, UpdaterEvent};

/// Application version, single source of truth
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Passed to the relaunched executable after a self-update.
pub const UPDATED_FLAG: &str = "--updated";

const USER_AGENT: &str = concat!("Prism-Updater/", env!("CARGO_PKG_VERSION"));
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

/// A newer release with an asset for this platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableUpdate {
    pub version: String,
    pub download_url: String,
    pub size: u64,
    pub page_url: String,
}

/// Decide from a feed body whether a newer release exists.
pub fn parse_release(
    body: &str,
    current_version: &str,
    asset_name: &str,
) -> Result<Option<AvailableUpdate>, UpdateError> {
    let release: Release =
        serde_json::from_str(body).map_err(|e| UpdateError::Feed(e.to_string()))?;
    let latest = release.tag_name.trim_start_matches('v');
    if latest.is_empty() {
        return Err(UpdateError::Feed("release has no tag".into()));
    }
    if !version_newer(latest, current_version) {
        return Ok(None);
    }
    let asset = release
        .assets
        .iter()
        .find(|a| a.name == asset_name)
        .ok_or_else(|| {
            UpdateError::Feed(format!("release {latest} has no asset named {asset_name}"))
        })?;
    Ok(Some(AvailableUpdate {
        version: latest.to_string(),
        download_url: asset.browser_download_url.clone(),
        size: asset.size,
        page_url: release.html_url.clone(),
    }))
}

/// Returns true if `a` is newer than `b` (simple semver comparison)
pub fn version_newer(a: &str, b: &str) -> bool {
    let parse = |v: &str| -> Vec<u32> {
        v.split(['.', '-', '+'])
            .map_while(|s| s.parse::<u32>().ok())
            .collect()
    };
    let va = parse(a);
    let vb = parse(b);
    for i in 0..va.len().max(vb.len()) {
        let ca = va.get(i).copied().unwrap_or(0);
        let cb = vb.get(i).copied().unwrap_or(0);
        if ca > cb {
            return true;
        }
        if ca < cb {
            return false;
        }
    }
    false
}

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(15))
        .timeout_read(Duration::from_secs(300))
        .build()
}

fn request_error(e: ureq::Error) -> UpdateError {
    match e {
        ureq::Error::Status(code, _) => UpdateError::Status(code),
        ureq::Error::Transport(t) => UpdateError::Network(t.to_string()),
    }
}

/// Fetch the feed. A missing feed (404) means nothing was released yet.
pub fn fetch_latest(
    feed_url: &str,
    current_version: &str,
    asset_name: &str,
) -> Result<Option<AvailableUpdate>, UpdateError> {
    let response = match agent()
        .get(feed_url)
        .set("User-Agent", USER_AGENT)
        .set("Accept", "application/json")
        .call()
    {
        Ok(r) => r,
        Err(ureq::Error::Status(404, _)) => {
            tracing::info!("no releases published at {feed_url}");
            return Ok(None);
        }
        Err(e) => return Err(request_error(e)),
    };
    let body = response
        .into_string()
        .map_err(|e| UpdateError::Network(format!("failed to read response: {e}")))?;
    parse_release(&body, current_version, asset_name)
}

/// Stream `update` to `dest`, reporting progress through `on_progress`.
pub fn download_to(
    update: &AvailableUpdate,
    dest: &Path,
    mut on_progress: impl FnMut(u64, u64),
) -> Result<(), UpdateError> {
    let response = agent()
        .get(&update.download_url)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(request_error)?;

    let total = response
        .header("Content-Length")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(update.size);

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| UpdateError::Io(format!("cannot create {}: {e}", parent.display())))?;
    }
    let mut file = fs::File::create(dest)
        .map_err(|e| UpdateError::Io(format!("failed to create temp file: {e}")))?;

    let mut reader = response.into_reader();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut transferred = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| UpdateError::Network(format!("download interrupted: {e}")))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .map_err(|e| UpdateError::Io(format!("failed to write update: {e}")))?;
        transferred += n as u64;
        on_progress(transferred, total);
    }
    file.flush()
        .map_err(|e| UpdateError::Io(format!("failed to write update: {e}")))?;
    Ok(())
}

fn old_exe_path(current: &Path) -> PathBuf {
    let mut name = current.as_os_str().to_owned();
    name.push(".old");
    PathBuf::from(name)
}

/// Swap `current` for `new_binary`, keeping the previous executable next to
/// it as `<name>.old` until the next start.
pub fn replace_executable(new_binary: &Path, current: &Path) -> Result<(), UpdateError> {
    let old_path = old_exe_path(current);
    let _ = fs::remove_file(&old_path);

    fs::rename(current, &old_path)
        .map_err(|e| UpdateError::Install(format!("failed to rename current exe: {e}")))?;

    if let Err(e) = fs::copy(new_binary, current) {
        let _ = fs::rename(&old_path, current);
        return Err(UpdateError::Install(format!("failed to copy new exe: {e}")));
    }
    set_executable(current)?;
    let _ = fs::remove_file(new_binary);
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), UpdateError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| UpdateError::Install(format!("cannot mark {} executable: {e}", path.display())))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), UpdateError> {
    Ok(())
}

/// Check if the app was just updated (launched with --updated flag)
pub fn was_just_updated() -> bool {
    std::env::args().any(|a| a == UPDATED_FLAG)
}

/// Clean up the .old file from a previous update
pub fn cleanup_old_exe() {
    if let Ok(current) = std::env::current_exe() {
        let _ = fs::remove_file(old_exe_path(&current));
    }
}

#[derive(Debug, Default)]
struct Inflight {
    busy: AtomicBool,
    pending: Mutex<Option<AvailableUpdate>>,
    downloaded: Mutex<Option<PathBuf>>,
}

impl Inflight {
    fn pending(&self) -> Option<AvailableUpdate> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_pending(&self, update: Option<AvailableUpdate>) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = update;
    }

    fn downloaded(&self) -> Option<PathBuf> {
        self.downloaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_downloaded(&self, path: Option<PathBuf>) {
        *self.downloaded.lock().unwrap_or_else(PoisonError::into_inner) = path;
    }
}

/// [`UpdateClient`] backed by the release feed.
///
/// Checks and downloads run on a background thread and report back as
/// [`UpdaterEvent`]s. A request arriving while another one is running is
/// ignored.
pub struct ReleaseFeedClient {
    feed_url: String,
    current_version: String,
    asset_name: String,
    download_dir: PathBuf,
    events: Sender<UpdaterEvent>,
    inflight: Arc<Inflight>,
}

impl ReleaseFeedClient {
    pub fn new(
        feed_url: impl Into<String>,
        asset_name: impl Into<String>,
        events: Sender<UpdaterEvent>,
    ) -> Self {
        Self {
            feed_url: feed_url.into(),
            current_version: APP_VERSION.to_owned(),
            asset_name: asset_name.into(),
            download_dir: std::env::temp_dir().join("prism-update"),
            events,
            inflight: Arc::default(),
        }
    }

    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = version.into();
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn is_busy(&self) -> bool {
        self.inflight.busy.load(Ordering::SeqCst)
    }

    /// Run `job` on a worker thread. The job's return value is its final
    /// event; the client is marked idle before that event goes out, so a
    /// request made in reaction to it is not mistaken for a duplicate.
    fn spawn(
        &self,
        name: &str,
        job: impl FnOnce(&Sender<UpdaterEvent>, &Inflight) -> UpdaterEvent + Send + 'static,
    ) -> Result<(), UpdateError> {
        if self.inflight.busy.swap(true, Ordering::SeqCst) {
            tracing::debug!("{name} ignored, updater already busy");
            return Ok(());
        }
        let events = self.events.clone();
        let inflight = Arc::clone(&self.inflight);
        std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let last = job(&events, inflight.as_ref());
                inflight.busy.store(false, Ordering::SeqCst);
                send(&events, last);
            })
            .map(|_| ())
            .map_err(|e| {
                self.inflight.busy.store(false, Ordering::SeqCst);
                UpdateError::Io(format!("cannot start {name}: {e}"))
            })
    }
}

fn send(events: &Sender<UpdaterEvent>, event: UpdaterEvent) {
    if events.send(event).is_err() {
        tracing::debug!("update event receiver dropped");
    }
}

impl UpdateClient for ReleaseFeedClient {
    fn check_for_updates(&mut self) -> Result<(), UpdateError> {
        let feed_url = self.feed_url.clone();
        let current = self.current_version.clone();
        let asset = self.asset_name.clone();
        self.spawn("update-check", move |events, inflight| {
            send(events, UpdaterEvent::CheckingForUpdate);
            match fetch_latest(&feed_url, &current, &asset) {
                Ok(Some(update)) => {
                    let version = update.version.clone();
                    inflight.set_pending(Some(update));
                    UpdaterEvent::UpdateAvailable { version }
                }
                Ok(None) => {
                    inflight.set_pending(None);
                    UpdaterEvent::UpdateNotAvailable
                }
                Err(e) => UpdaterEvent::Error(e),
            }
        })
    }

    fn download_update(&mut self) -> Result<(), UpdateError> {
        let update = self.inflight.pending().ok_or(UpdateError::NothingPending)?;
        let dest = self.download_dir.join(&self.asset_name);
        self.spawn("update-download", move |events, inflight| {
            let mut last_percent = -1.0f64;
            let result = download_to(&update, &dest, |transferred, total| {
                if total == 0 {
                    return;
                }
                let percent = transferred as f64 * 100.0 / total as f64;
                if percent - last_percent >= 1.0 || transferred == total {
                    last_percent = percent;
                    send(
                        events,
                        UpdaterEvent::DownloadProgress {
                            percent,
                            transferred,
                            total,
                        },
                    );
                }
            });
            match result {
                Ok(()) => {
                    inflight.set_downloaded(Some(dest));
                    UpdaterEvent::UpdateDownloaded {
                        version: update.version,
                    }
                }
                Err(e) => {
                    let _ = fs::remove_file(&dest);
                    UpdaterEvent::Error(e)
                }
            }
        })
    }

    fn quit_and_install(&mut self) -> Result<(), UpdateError> {
        let downloaded = self
            .inflight
            .downloaded()
            .ok_or(UpdateError::NothingPending)?;
        let current = std::env::current_exe().map_err(|e| {
            UpdateError::Install(format!("cannot determine current exe path: {e}"))
        })?;

        replace_executable(&downloaded, &current)?;
        self.inflight.set_downloaded(None);

        std::process::Command::new(&current)
            .arg(UPDATED_FLAG)
            .spawn()
            .map_err(|e| UpdateError::Install(format!("failed to relaunch: {e}")))?;
        tracing::info!("relaunched {}, exiting", current.display());
        std::process::exit(0);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::mpsc;

    const FEED: &str = r#"{
        "tag_name": "v2.0.0",
        "html_url": "https://example.com/releases/v2.0.0",
        "assets": [
            {"name": "prism.exe", "browser_download_url": "https://example.com/prism.exe", "size": 1024},
            {"name": "prism-linux-x86_64", "browser_download_url": "https://example.com/prism-linux", "size": 2048}
        ]
    }"#;

    #[test]
    fn version_comparison() {
        assert!(version_newer("2.0.0", "1.9.9"));
        assert!(version_newer("1.10.0", "1.9.0"));
        assert!(version_newer("1.0.1", "1.0"));
        assert!(!version_newer("1.0.0", "1.0.0"));
        assert!(!version_newer("1.0", "1.0.0"));
        assert!(!version_newer("0.9.9", "1.0.0"));
        assert!(!version_newer("1.2.0-beta.1", "1.2.0"));
    }

    #[test]
    fn newer_release_picks_matching_asset() {
        let update = parse_release(FEED, "1.0.0", "prism-linux-x86_64")
            .unwrap()
            .unwrap();
        assert_eq!(update.version, "2.0.0");
        assert_eq!(update.download_url, "https://example.com/prism-linux");
        assert_eq!(update.size, 2048);
    }

    #[test]
    fn same_version_is_no_update() {
        assert_eq!(parse_release(FEED, "2.0.0", "prism.exe").unwrap(), None);
    }

    #[test]
    fn missing_asset_is_a_feed_error() {
        let err = parse_release(FEED, "1.0.0", "prism.dmg").unwrap_err();
        assert!(matches!(err, UpdateError::Feed(msg) if msg.contains("prism.dmg")));
    }

    #[test]
    fn garbage_feed_is_a_feed_error() {
        assert!(matches!(
            parse_release("<html>", "1.0.0", "prism.exe"),
            Err(UpdateError::Feed(_))
        ));
        assert!(matches!(
            parse_release(r#"{"tag_name": ""}"#, "1.0.0", "prism.exe"),
            Err(UpdateError::Feed(_))
        ));
    }

    #[test]
    fn replace_keeps_previous_binary_aside() {
        let dir = tempfile::tempdir().unwrap();
        let current = dir.path().join("prism");
        let new_binary = dir.path().join("download");
        fs::write(&current, b"old").unwrap();
        fs::write(&new_binary, b"new").unwrap();

        replace_executable(&new_binary, &current).unwrap();

        assert_eq!(fs::read(&current).unwrap(), b"new");
        assert_eq!(fs::read(old_exe_path(&current)).unwrap(), b"old");
        assert!(!new_binary.exists());
    }

    #[test]
    fn replace_restores_original_when_copy_fails() {
        let dir = tempfile::tempdir().unwrap();
        let current = dir.path().join("prism");
        fs::write(&current, b"old").unwrap();

        let err = replace_executable(&dir.path().join("missing"), &current).unwrap_err();
        assert!(matches!(err, UpdateError::Install(_)));
        assert_eq!(fs::read(&current).unwrap(), b"old");
    }

    #[test]
    fn download_before_check_has_nothing_pending() {
        let (tx, _rx) = mpsc::channel();
        let mut client = ReleaseFeedClient::new("http://127.0.0.1:9/feed", "prism.exe", tx);
        assert_eq!(client.download_update(), Err(UpdateError::NothingPending));
        assert_eq!(client.quit_and_install(), Err(UpdateError::NothingPending));
    }

    #[test]
    fn unreachable_feed_reports_network_error() {
        let (tx, rx) = mpsc::channel();
        let mut client = ReleaseFeedClient::new("http://127.0.0.1:9/feed", "prism.exe", tx);
        client.check_for_updates().unwrap();

        let timeout = Duration::from_secs(30);
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            UpdaterEvent::CheckingForUpdate
        );
        match rx.recv_timeout(timeout).unwrap() {
            UpdaterEvent::Error(e) => assert!(e.is_network(), "unexpected error {e:?}"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
