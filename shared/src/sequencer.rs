//! Auto-update lifecycle.
//!
//! ```text
//! Idle -> Checking -> UpdateAvailable -> Downloading -> Downloaded -> Installing
//! Idle -> Checking -> NoUpdate -> Idle
//! Checking | UpdateAvailable | Downloading -> Error -> Idle
//! ```
//!
//! The sequencer never owns a thread or a timer. The host update client
//! reports progress as [`UpdaterEvent`]s, and the embedding event loop calls
//! [`UpdateSequencer::tick`] so that the startup check and the install
//! countdown fire when their deadlines pass.

use std::time::{Duration, Instant};

use crate::config::InstallPolicy;
use crate::error::UpdateError;
use crate::notify::UiNotifier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdatePhase {
    #[default]
    Idle,
    Checking,
    UpdateAvailable,
    NoUpdate,
    Downloading,
    Downloaded,
    Installing,
    Error,
}

impl UpdatePhase {
    /// A lifecycle run is in progress.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Checking | Self::UpdateAvailable | Self::Downloading | Self::Installing
        )
    }
}

/// State of the current lifecycle run. Lives in memory only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSession {
    pub phase: UpdatePhase,
    pub version: Option<String>,
    pub progress_percent: Option<f64>,
    pub error: Option<String>,
}

/// Lifecycle callbacks from the host update client.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdaterEvent {
    CheckingForUpdate,
    UpdateAvailable { version: String },
    UpdateNotAvailable,
    DownloadProgress {
        percent: f64,
        transferred: u64,
        total: u64,
    },
    UpdateDownloaded { version: String },
    Error(UpdateError),
}

/// Requests the sequencer makes of the host update client.
///
/// The client is the source of truth for in-flight work: it may ignore a
/// check or download request that duplicates one already running.
pub trait UpdateClient {
    fn check_for_updates(&mut self) -> Result<(), UpdateError>;
    fn download_update(&mut self) -> Result<(), UpdateError>;
    /// Restart into the downloaded update. On success the process is
    /// normally gone before this returns.
    fn quit_and_install(&mut self) -> Result<(), UpdateError>;
}

impl<C: UpdateClient + ?Sized> UpdateClient for &mut C {
    fn check_for_updates(&mut self) -> Result<(), UpdateError> {
        (**self).check_for_updates()
    }

    fn download_update(&mut self) -> Result<(), UpdateError> {
        (**self).download_update()
    }

    fn quit_and_install(&mut self) -> Result<(), UpdateError> {
        (**self).quit_and_install()
    }
}

pub const STATUS_CHECKING: &str = "Checking for updates...";
pub const STATUS_NO_UPDATE: &str = "No update available.";

pub struct UpdateSequencer<C, N> {
    client: C,
    notifier: N,
    policy: InstallPolicy,
    settle_delay: Duration,
    session: UpdateSession,
    startup_check_at: Option<Instant>,
    install_at: Option<Instant>,
}

impl<C: UpdateClient, N: UiNotifier> UpdateSequencer<C, N> {
    pub fn new(client: C, notifier: N, policy: InstallPolicy, settle_delay: Duration) -> Self {
        Self {
            client,
            notifier,
            policy,
            settle_delay,
            session: UpdateSession::default(),
            startup_check_at: None,
            install_at: None,
        }
    }

    pub fn session(&self) -> &UpdateSession {
        &self.session
    }

    pub fn phase(&self) -> UpdatePhase {
        self.session.phase
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Next instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.startup_check_at, self.install_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Arm the one-shot startup check, `settle_delay` after `now`.
    pub fn schedule_startup_check(&mut self, now: Instant) {
        self.startup_check_at = Some(now + self.settle_delay);
    }

    pub fn tick(&mut self, now: Instant) {
        if self.startup_check_at.is_some_and(|at| now >= at) {
            self.startup_check_at = None;
            tracing::info!("running startup update check");
            self.request_check();
        }
        if self.install_at.is_some_and(|at| now >= at) {
            self.install_at = None;
            self.install();
        }
    }

    /// Manual or scheduled check, forwarded to the client. Once an update is
    /// downloaded the run only waits for installation, so further checks are
    /// answered locally instead of fetching it again.
    pub fn request_check(&mut self) {
        if self.session.phase == UpdatePhase::Downloaded {
            let version = self.session.version.as_deref().unwrap_or("unknown");
            tracing::debug!(%version, "check skipped, update already downloaded");
            self.notifier
                .status(&format!("Update {version} is already downloaded."));
            return;
        }
        if !self.session.phase.is_busy() {
            self.session = UpdateSession {
                phase: UpdatePhase::Checking,
                ..UpdateSession::default()
            };
        }
        if let Err(e) = self.client.check_for_updates() {
            self.fail(e);
        }
    }

    pub fn handle_event(&mut self, event: UpdaterEvent, now: Instant) {
        match event {
            UpdaterEvent::CheckingForUpdate => {
                if !self.session.phase.is_busy() {
                    self.session.phase = UpdatePhase::Checking;
                }
                self.notifier.status(STATUS_CHECKING);
            }
            UpdaterEvent::UpdateAvailable { version } => self.on_available(version),
            UpdaterEvent::UpdateNotAvailable => {
                self.session.phase = UpdatePhase::NoUpdate;
                tracing::info!("no update available");
                self.notifier.status(STATUS_NO_UPDATE);
                self.session = UpdateSession::default();
            }
            UpdaterEvent::DownloadProgress {
                percent,
                transferred,
                total,
            } => {
                let percent = percent.clamp(0.0, 100.0);
                tracing::debug!("update download {percent:.1}% ({transferred}/{total} bytes)");
                self.session.phase = UpdatePhase::Downloading;
                self.session.progress_percent = Some(percent);
                self.notifier.progress(percent);
            }
            UpdaterEvent::UpdateDownloaded { version } => self.on_downloaded(version, now),
            UpdaterEvent::Error(e) => self.fail(e),
        }
    }

    /// Install a downloaded update when the application quits, if the
    /// policy defers installation to that point.
    pub fn on_quit(&mut self) {
        if self.policy == InstallPolicy::OnQuit && self.session.phase == UpdatePhase::Downloaded {
            self.install();
        }
    }

    fn on_available(&mut self, version: String) {
        tracing::info!(%version, "update available, downloading");
        self.session.phase = UpdatePhase::UpdateAvailable;
        self.session.error = None;
        self.notifier.status(&format!(
            "Update available: version {version}. Downloading..."
        ));
        self.session.version = Some(version);

        match self.client.download_update() {
            Ok(()) => {
                self.session.phase = UpdatePhase::Downloading;
                self.session.progress_percent = Some(0.0);
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_downloaded(&mut self, version: String, now: Instant) {
        tracing::info!(%version, "update downloaded");
        self.session.phase = UpdatePhase::Downloaded;
        self.session.progress_percent = Some(100.0);
        self.session.version = Some(version.clone());
        self.notifier.progress(100.0);

        match self.policy {
            InstallPolicy::Immediate => {
                self.notifier
                    .status(&format!("Update {version} downloaded. Restarting to install..."));
                self.install();
            }
            InstallPolicy::AfterDelay { secs } => {
                self.notifier.status(&format!(
                    "Update {version} downloaded. Restarting to install in {secs} seconds..."
                ));
                self.install_at = Some(now + Duration::from_secs(secs));
            }
            InstallPolicy::OnQuit => {
                self.notifier.status(&format!(
                    "Update {version} downloaded. It will be installed when you quit."
                ));
            }
        }
    }

    fn install(&mut self) {
        if self.session.phase != UpdatePhase::Downloaded {
            tracing::debug!(phase = ?self.session.phase, "nothing to install");
            return;
        }
        self.session.phase = UpdatePhase::Installing;
        self.notifier.status("Installing update...");
        tracing::info!(version = ?self.session.version, "restarting to install update");
        if let Err(e) = self.client.quit_and_install() {
            self.fail(e);
        }
    }

    fn fail(&mut self, error: UpdateError) {
        tracing::error!(phase = ?self.session.phase, "update error: {error}");
        self.install_at = None;
        self.session.phase = UpdatePhase::Error;
        let message = error.user_message();
        self.notifier.status(&message);
        self.session = UpdateSession {
            error: Some(message),
            ..UpdateSession::default()
        };
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::notify::{RecordingNotifier, UiMessage};

    #[derive(Debug, Default)]
    struct ScriptedClient {
        checks: usize,
        downloads: usize,
        installs: usize,
        fail_download: Option<UpdateError>,
        fail_install: Option<UpdateError>,
    }

    impl UpdateClient for ScriptedClient {
        fn check_for_updates(&mut self) -> Result<(), UpdateError> {
            self.checks += 1;
            Ok(())
        }

        fn download_update(&mut self) -> Result<(), UpdateError> {
            self.downloads += 1;
            self.fail_download.take().map_or(Ok(()), Err)
        }

        fn quit_and_install(&mut self) -> Result<(), UpdateError> {
            self.installs += 1;
            self.fail_install.take().map_or(Ok(()), Err)
        }
    }

    type Sequencer = UpdateSequencer<ScriptedClient, RecordingNotifier>;

    fn sequencer(policy: InstallPolicy) -> Sequencer {
        UpdateSequencer::new(
            ScriptedClient::default(),
            RecordingNotifier::default(),
            policy,
            Duration::from_secs(5),
        )
    }

    fn available(version: &str) -> UpdaterEvent {
        UpdaterEvent::UpdateAvailable {
            version: version.to_owned(),
        }
    }

    fn downloaded(version: &str) -> UpdaterEvent {
        UpdaterEvent::UpdateDownloaded {
            version: version.to_owned(),
        }
    }

    #[test]
    fn startup_check_waits_for_settle_delay() {
        let mut seq = sequencer(InstallPolicy::default());
        let start = Instant::now();
        seq.schedule_startup_check(start);
        assert_eq!(seq.next_deadline(), Some(start + Duration::from_secs(5)));

        seq.tick(start + Duration::from_secs(4));
        assert_eq!(seq.client().checks, 0);
        assert_eq!(seq.phase(), UpdatePhase::Idle);

        seq.tick(start + Duration::from_secs(5));
        assert_eq!(seq.client().checks, 1);
        assert_eq!(seq.phase(), UpdatePhase::Checking);

        seq.tick(start + Duration::from_secs(60));
        assert_eq!(seq.client().checks, 1);
    }

    #[test]
    fn available_update_downloads_without_confirmation() {
        let mut seq = sequencer(InstallPolicy::default());
        let now = Instant::now();
        seq.request_check();
        seq.handle_event(UpdaterEvent::CheckingForUpdate, now);
        seq.handle_event(available("2.0.0"), now);

        assert_eq!(seq.phase(), UpdatePhase::Downloading);
        assert_eq!(seq.client().downloads, 1);
        assert_eq!(seq.session().version.as_deref(), Some("2.0.0"));
        assert!(seq.notifier().statuses().iter().any(|s| s.contains("2.0.0")));
    }

    #[test]
    fn no_update_returns_to_idle_and_allows_another_check() {
        let mut seq = sequencer(InstallPolicy::default());
        let now = Instant::now();
        seq.request_check();
        seq.handle_event(UpdaterEvent::UpdateNotAvailable, now);

        assert_eq!(seq.phase(), UpdatePhase::Idle);
        assert_eq!(seq.notifier().statuses().last(), Some(&STATUS_NO_UPDATE));

        seq.request_check();
        assert_eq!(seq.phase(), UpdatePhase::Checking);
        assert_eq!(seq.client().checks, 2);
    }

    #[test]
    fn repeated_manual_checks_are_forwarded_without_resetting_progress() {
        let mut seq = sequencer(InstallPolicy::default());
        let now = Instant::now();
        seq.request_check();
        seq.handle_event(available("2.0.0"), now);
        seq.handle_event(
            UpdaterEvent::DownloadProgress {
                percent: 40.0,
                transferred: 40,
                total: 100,
            },
            now,
        );

        seq.request_check();
        assert_eq!(seq.client().checks, 2);
        assert_eq!(seq.phase(), UpdatePhase::Downloading);
        assert_eq!(seq.session().progress_percent, Some(40.0));
    }

    #[test]
    fn progress_is_pushed_to_the_ui() {
        let mut seq = sequencer(InstallPolicy::default());
        let now = Instant::now();
        seq.handle_event(available("1.1.0"), now);
        seq.handle_event(
            UpdaterEvent::DownloadProgress {
                percent: 120.0,
                transferred: 12,
                total: 10,
            },
            now,
        );
        assert!(seq
            .notifier()
            .messages
            .contains(&UiMessage::UpdateProgress(100.0)));
    }

    #[test]
    fn delayed_install_fires_after_countdown() {
        let mut seq = sequencer(InstallPolicy::AfterDelay { secs: 3 });
        let now = Instant::now();
        seq.handle_event(available("2.0.0"), now);
        seq.handle_event(downloaded("2.0.0"), now);
        assert_eq!(seq.phase(), UpdatePhase::Downloaded);
        assert!(seq
            .notifier()
            .statuses()
            .iter()
            .any(|s| s.contains("in 3 seconds")));

        seq.tick(now + Duration::from_secs(2));
        assert_eq!(seq.client().installs, 0);

        seq.tick(now + Duration::from_secs(3));
        assert_eq!(seq.client().installs, 1);
        assert_eq!(seq.phase(), UpdatePhase::Installing);
    }

    #[test]
    fn immediate_policy_installs_on_download() {
        let mut seq = sequencer(InstallPolicy::Immediate);
        let now = Instant::now();
        seq.handle_event(available("2.0.0"), now);
        seq.handle_event(downloaded("2.0.0"), now);
        assert_eq!(seq.client().installs, 1);
        assert_eq!(seq.next_deadline(), None);
    }

    #[test]
    fn on_quit_policy_waits_for_quit() {
        let mut seq = sequencer(InstallPolicy::OnQuit);
        let now = Instant::now();
        seq.handle_event(available("2.0.0"), now);
        seq.handle_event(downloaded("2.0.0"), now);
        seq.tick(now + Duration::from_secs(3600));
        assert_eq!(seq.client().installs, 0);

        seq.on_quit();
        assert_eq!(seq.client().installs, 1);
    }

    #[test]
    fn check_during_countdown_keeps_downloaded_update() {
        let mut seq = sequencer(InstallPolicy::AfterDelay { secs: 3 });
        let now = Instant::now();
        seq.request_check();
        seq.handle_event(available("2.0.0"), now);
        seq.handle_event(downloaded("2.0.0"), now);

        seq.request_check();
        assert_eq!(seq.client().checks, 1);
        assert_eq!(seq.phase(), UpdatePhase::Downloaded);
        assert_eq!(
            seq.notifier().statuses().last(),
            Some(&"Update 2.0.0 is already downloaded.")
        );

        seq.tick(now + Duration::from_secs(3));
        assert_eq!(seq.client().installs, 1);
        assert_eq!(seq.client().downloads, 1);
    }

    #[test]
    fn check_under_on_quit_policy_keeps_downloaded_update() {
        let mut seq = sequencer(InstallPolicy::OnQuit);
        let now = Instant::now();
        seq.handle_event(available("2.0.0"), now);
        seq.handle_event(downloaded("2.0.0"), now);
        seq.request_check();
        assert_eq!(seq.client().checks, 0);

        seq.on_quit();
        assert_eq!(seq.client().installs, 1);
    }

    #[test]
    fn on_quit_without_download_does_nothing() {
        let mut seq = sequencer(InstallPolicy::OnQuit);
        seq.on_quit();
        assert_eq!(seq.client().installs, 0);
    }

    #[test]
    fn network_error_gets_friendly_message_and_returns_to_idle() {
        let mut seq = sequencer(InstallPolicy::default());
        let now = Instant::now();
        seq.request_check();
        seq.handle_event(
            UpdaterEvent::Error(UpdateError::Network("dns failure".into())),
            now,
        );

        assert_eq!(seq.phase(), UpdatePhase::Idle);
        let last = seq.notifier().statuses().last().copied().unwrap();
        assert!(last.contains("internet connection"));
        assert_eq!(seq.session().error.as_deref(), Some(last));
        assert_eq!(seq.client().checks, 1);
    }

    #[test]
    fn failed_download_request_is_an_error() {
        let mut seq = Sequencer::new(
            ScriptedClient {
                fail_download: Some(UpdateError::Io("disk full".into())),
                ..ScriptedClient::default()
            },
            RecordingNotifier::default(),
            InstallPolicy::default(),
            Duration::ZERO,
        );
        seq.handle_event(available("2.0.0"), Instant::now());
        assert_eq!(seq.phase(), UpdatePhase::Idle);
        assert!(seq
            .notifier()
            .statuses()
            .last()
            .unwrap()
            .contains("disk full"));
    }

    #[test]
    fn failed_install_returns_to_idle() {
        let mut seq = Sequencer::new(
            ScriptedClient {
                fail_install: Some(UpdateError::Install("access denied".into())),
                ..ScriptedClient::default()
            },
            RecordingNotifier::default(),
            InstallPolicy::Immediate,
            Duration::ZERO,
        );
        let now = Instant::now();
        seq.handle_event(available("2.0.0"), now);
        seq.handle_event(downloaded("2.0.0"), now);
        assert_eq!(seq.client().installs, 1);
        assert_eq!(seq.phase(), UpdatePhase::Idle);
    }

    #[test]
    fn error_during_countdown_cancels_install() {
        let mut seq = sequencer(InstallPolicy::AfterDelay { secs: 3 });
        let now = Instant::now();
        seq.handle_event(available("2.0.0"), now);
        seq.handle_event(downloaded("2.0.0"), now);
        seq.handle_event(UpdaterEvent::Error(UpdateError::Status(500)), now);
        seq.tick(now + Duration::from_secs(10));
        assert_eq!(seq.client().installs, 0);
    }
}
