//! Active window registry and the event handling that keeps window state
//! persisted.
//!
//! The host windowing API is abstracted behind [`WindowHost`]. A host creates
//! windows, answers geometry queries and delivers [`WindowEvent`]s for the
//! kinds a window was subscribed to through [`WindowHost::listen`]. The
//! [`WindowTracker`] owns the registry, reacts to those events and releases
//! every subscription on the window's teardown path.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::HostError;
use crate::notify::UiNotifier;
use crate::window_state::{self, Bounds, WindowDefaults, WindowStateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    #[default]
    Default,
    Incognito,
}

impl WindowKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::Default => "Prism (by PrimeX)",
            Self::Incognito => "Incognito - Prism",
        }
    }

    /// Storage partition; incognito windows never touch persistent storage.
    pub fn partition(self) -> &'static str {
        match self {
            Self::Default => "persist:default",
            Self::Incognito => "incognito",
        }
    }
}

/// Everything the host needs to create a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowOptions {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
    /// Windows start hidden and are shown on [`WindowEvent::ReadyToShow`].
    pub show: bool,
    pub frame: bool,
    pub title: &'static str,
    pub partition: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowEvent {
    Resize,
    Move,
    /// The window is about to close; bounds are still readable.
    Close,
    /// The window is gone.
    Closed,
    Maximize,
    Unmaximize,
    Focus,
    /// First paint is ready.
    ReadyToShow,
}

impl WindowEvent {
    /// Every event the tracker listens for.
    pub const TRACKED: [WindowEvent; 8] = [
        WindowEvent::Resize,
        WindowEvent::Move,
        WindowEvent::Close,
        WindowEvent::Closed,
        WindowEvent::Maximize,
        WindowEvent::Unmaximize,
        WindowEvent::Focus,
        WindowEvent::ReadyToShow,
    ];
}

/// Handle for a set of registered listeners, returned by
/// [`WindowHost::listen`] and handed back to [`WindowHost::unlisten`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub window: WindowId,
    pub token: u64,
}

/// The host windowing API.
pub trait WindowHost {
    fn create_window(&mut self, options: &WindowOptions) -> Result<WindowId, HostError>;
    fn bounds(&self, id: WindowId) -> Result<Bounds, HostError>;
    fn is_minimized(&self, id: WindowId) -> bool;
    fn is_maximized(&self, id: WindowId) -> bool;
    /// Unknown windows count as destroyed.
    fn is_destroyed(&self, id: WindowId) -> bool;
    fn maximize(&mut self, id: WindowId) -> Result<(), HostError>;
    fn unmaximize(&mut self, id: WindowId) -> Result<(), HostError>;
    fn minimize(&mut self, id: WindowId) -> Result<(), HostError>;
    fn show(&mut self, id: WindowId) -> Result<(), HostError>;
    fn destroy(&mut self, id: WindowId) -> Result<(), HostError>;
    fn listen(&mut self, id: WindowId, events: &[WindowEvent]) -> Result<Subscription, HostError>;
    fn unlisten(&mut self, subscription: Subscription);
}

#[derive(Debug)]
struct TrackedWindow {
    kind: WindowKind,
    subscription: Option<Subscription>,
    restore_maximized: bool,
}

/// Owned table of open windows.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: BTreeMap<WindowId, TrackedWindow>,
    main: Option<WindowId>,
    focused: Option<WindowId>,
}

impl WindowRegistry {
    fn insert(&mut self, id: WindowId, tracked: TrackedWindow) {
        self.windows.insert(id, tracked);
        if self.main.is_none() {
            self.main = Some(id);
        }
    }

    fn remove(&mut self, id: WindowId) -> Option<TrackedWindow> {
        if self.main == Some(id) {
            self.main = None;
        }
        if self.focused == Some(id) {
            self.focused = None;
        }
        self.windows.remove(&id)
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.windows.contains_key(&id)
    }

    pub fn kind(&self, id: WindowId) -> Option<WindowKind> {
        self.windows.get(&id).map(|w| w.kind)
    }

    /// The first window opened, until it closes.
    pub fn main(&self) -> Option<WindowId> {
        self.main
    }

    pub fn focused(&self) -> Option<WindowId> {
        self.focused
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.windows.keys().copied()
    }
}

/// Reacts to window events: persists geometry, restores it on creation and
/// pushes maximize changes to the renderer.
pub struct WindowTracker<H, N> {
    host: H,
    notifier: N,
    store: WindowStateStore,
    defaults: WindowDefaults,
    registry: WindowRegistry,
}

impl<H: WindowHost, N: UiNotifier> WindowTracker<H, N> {
    pub fn new(host: H, notifier: N, store: WindowStateStore, defaults: WindowDefaults) -> Self {
        Self {
            host,
            notifier,
            store,
            defaults,
            registry: WindowRegistry::default(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    pub fn store(&self) -> &WindowStateStore {
        &self.store
    }

    /// Create a hidden window at the persisted geometry and start tracking it.
    pub fn open_window(&mut self, kind: WindowKind) -> Result<WindowId, HostError> {
        let saved = self.store.load_or_none();
        let geometry = window_state::resolve(saved.as_ref(), &self.defaults);
        let options = WindowOptions {
            x: geometry.x,
            y: geometry.y,
            width: geometry.width,
            height: geometry.height,
            min_width: self.defaults.min_width,
            min_height: self.defaults.min_height,
            show: false,
            frame: false,
            title: kind.title(),
            partition: kind.partition(),
        };

        let id = self.host.create_window(&options)?;
        let subscription = match self.host.listen(id, &WindowEvent::TRACKED) {
            Ok(subscription) => subscription,
            Err(e) => {
                if let Err(destroy_err) = self.host.destroy(id) {
                    tracing::warn!(window = %id, "cannot destroy unsubscribed window: {destroy_err}");
                }
                return Err(e);
            }
        };
        self.registry.insert(
            id,
            TrackedWindow {
                kind,
                subscription: Some(subscription),
                restore_maximized: geometry.maximized,
            },
        );
        tracing::info!(window = %id, ?kind, "window opened");
        Ok(id)
    }

    pub fn handle_event(&mut self, id: WindowId, event: WindowEvent) {
        if !self.registry.contains(id) {
            tracing::debug!(window = %id, ?event, "event for untracked window");
            return;
        }
        match event {
            WindowEvent::Resize | WindowEvent::Move | WindowEvent::Close => self.persist(id),
            WindowEvent::Maximize => self.notifier.maximize_changed(id, true),
            WindowEvent::Unmaximize => self.notifier.maximize_changed(id, false),
            WindowEvent::ReadyToShow => self.reveal(id),
            WindowEvent::Focus => self.registry.focused = Some(id),
            WindowEvent::Closed => self.teardown(id),
        }
    }

    /// Save geometry, then destroy the window. Listeners are released even
    /// when saving fails.
    pub fn close_window(&mut self, id: WindowId) -> Result<(), HostError> {
        if !self.registry.contains(id) || self.host.is_destroyed(id) {
            return Err(HostError::UnknownWindow(id.0));
        }
        self.persist(id);
        self.release(id);
        let result = self.host.destroy(id);
        self.teardown(id);
        result
    }

    pub fn toggle_maximize(&mut self, id: WindowId) -> Result<(), HostError> {
        if self.host.is_destroyed(id) {
            return Err(HostError::UnknownWindow(id.0));
        }
        if self.host.is_maximized(id) {
            self.host.unmaximize(id)
        } else {
            self.host.maximize(id)
        }
    }

    pub fn minimize(&mut self, id: WindowId) -> Result<(), HostError> {
        if self.host.is_destroyed(id) {
            return Err(HostError::UnknownWindow(id.0));
        }
        self.host.minimize(id)
    }

    pub fn is_maximized(&self, id: WindowId) -> bool {
        !self.host.is_destroyed(id) && self.host.is_maximized(id)
    }

    /// Window that should receive an "open in new tab" request raised by `id`.
    pub fn new_tab_target(&self, id: WindowId) -> Option<WindowId> {
        let alive = |w: WindowId| self.registry.contains(w) && !self.host.is_destroyed(w);
        if alive(id) {
            return Some(id);
        }
        self.registry.main().filter(|&main| alive(main))
    }

    /// Kind of the window that last had focus.
    pub fn focused_kind(&self) -> Option<WindowKind> {
        self.registry.focused().and_then(|id| self.registry.kind(id))
    }

    fn persist(&mut self, id: WindowId) {
        if self.host.is_destroyed(id) || self.host.is_minimized(id) {
            return;
        }
        let bounds = match self.host.bounds(id) {
            Ok(bounds) => bounds,
            Err(e) => {
                tracing::warn!(window = %id, "cannot read window bounds: {e}");
                return;
            }
        };
        if let Err(e) = self.store.save(bounds, self.host.is_maximized(id)) {
            tracing::error!(window = %id, "error saving window state: {e}");
        }
    }

    fn reveal(&mut self, id: WindowId) {
        let Some(tracked) = self.registry.windows.get_mut(&id) else {
            return;
        };
        let kind = tracked.kind;
        if std::mem::take(&mut tracked.restore_maximized) {
            if let Err(e) = self.host.maximize(id) {
                tracing::warn!(window = %id, "cannot restore maximized state: {e}");
            }
        }
        if let Err(e) = self.host.show(id) {
            tracing::warn!(window = %id, "cannot show window: {e}");
        }
        self.notifier.window_kind(id, kind);
    }

    fn release(&mut self, id: WindowId) {
        let subscription = self
            .registry
            .windows
            .get_mut(&id)
            .and_then(|tracked| tracked.subscription.take());
        if let Some(subscription) = subscription {
            self.host.unlisten(subscription);
        }
    }

    fn teardown(&mut self, id: WindowId) {
        self.release(id);
        if self.registry.remove(id).is_some() {
            tracing::info!(window = %id, "window closed");
        }
    }
}
