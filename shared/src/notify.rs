//! Pushes from the shell core to the rendering surface.

use serde::Serialize;
use std::sync::mpsc::Sender;

use crate::window::{WindowId, WindowKind};

/// One message for the renderer, tagged with the channel it travels on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum UiMessage {
    UpdateStatus(String),
    UpdateProgress(f64),
    WindowMaximizeChanged { window: WindowId, maximized: bool },
    WindowType { window: WindowId, kind: WindowKind },
}

/// Sink for UI notifications.
///
/// Delivery is best-effort: a renderer that has gone away must not turn into
/// an error in the caller.
pub trait UiNotifier {
    fn notify(&mut self, message: UiMessage);

    fn status(&mut self, text: &str) {
        self.notify(UiMessage::UpdateStatus(text.to_owned()));
    }

    fn progress(&mut self, percent: f64) {
        self.notify(UiMessage::UpdateProgress(percent));
    }

    fn maximize_changed(&mut self, window: WindowId, maximized: bool) {
        self.notify(UiMessage::WindowMaximizeChanged { window, maximized });
    }

    fn window_kind(&mut self, window: WindowId, kind: WindowKind) {
        self.notify(UiMessage::WindowType { window, kind });
    }
}

/// Forwards notifications over an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: Sender<UiMessage>,
}

impl ChannelNotifier {
    pub fn new(tx: Sender<UiMessage>) -> Self {
        Self { tx }
    }
}

impl UiNotifier for ChannelNotifier {
    fn notify(&mut self, message: UiMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!("UI channel closed, dropping notification");
        }
    }
}

impl<N: UiNotifier + ?Sized> UiNotifier for &mut N {
    fn notify(&mut self, message: UiMessage) {
        (**self).notify(message);
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    pub messages: Vec<UiMessage>,
}

impl RecordingNotifier {
    pub fn statuses(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                UiMessage::UpdateStatus(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl UiNotifier for RecordingNotifier {
    fn notify(&mut self, message: UiMessage) {
        self.messages.push(message);
    }
}
