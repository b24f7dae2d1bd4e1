// Console front end for the update lifecycle

use std::io::Write;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use prism_shared::{
    InstallPolicy, UiMessage, UiNotifier, UpdateClient, UpdatePhase, UpdateSequencer,
    UpdateSession, UpdaterEvent,
};

/// Longest wait between two looks at the sequencer.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Prints UI notifications to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleNotifier {
    progress_line: bool,
}

impl UiNotifier for ConsoleNotifier {
    fn notify(&mut self, message: UiMessage) {
        let mut out = std::io::stdout().lock();
        match message {
            UiMessage::UpdateProgress(percent) => {
                let _ = write!(out, "\rDownloading update... {percent:>5.1}%");
                let _ = out.flush();
                self.progress_line = true;
            }
            UiMessage::UpdateStatus(text) => {
                if std::mem::take(&mut self.progress_line) {
                    let _ = writeln!(out);
                }
                let _ = writeln!(out, "{text}");
            }
            other => tracing::debug!(?other, "ignoring window notification"),
        }
    }
}

/// Nothing left to wait for in this run.
fn cycle_finished<C: UpdateClient, N: UiNotifier>(
    sequencer: &UpdateSequencer<C, N>,
    policy: InstallPolicy,
) -> bool {
    if sequencer.next_deadline().is_some() {
        return false;
    }
    match sequencer.phase() {
        UpdatePhase::Idle | UpdatePhase::Installing => true,
        UpdatePhase::Downloaded => policy == InstallPolicy::OnQuit,
        _ => false,
    }
}

/// Pump client events into the sequencer until the lifecycle run is over,
/// then give an install-on-quit policy its chance.
pub fn drive<C: UpdateClient, N: UiNotifier>(
    sequencer: &mut UpdateSequencer<C, N>,
    events: &Receiver<UpdaterEvent>,
    policy: InstallPolicy,
) -> UpdateSession {
    loop {
        let now = Instant::now();
        sequencer.tick(now);
        if cycle_finished(sequencer, policy) {
            break;
        }

        let wait = sequencer
            .next_deadline()
            .map(|at| at.saturating_duration_since(now).min(POLL_INTERVAL))
            .unwrap_or(POLL_INTERVAL);
        match events.recv_timeout(wait) {
            Ok(event) => sequencer.handle_event(event, Instant::now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("update client went away");
                break;
            }
        }
    }
    let session = sequencer.session().clone();
    sequencer.on_quit();
    session
}
