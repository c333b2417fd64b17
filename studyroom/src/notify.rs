use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::ChatMessage;

/// Default recency window for chat notifications.
pub const DEFAULT_WINDOW_MS: i64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Local notification surface provided by the platform.
pub trait Notifier: Send + Sync {
    fn request_permission(&self) -> BoxFuture<'_, anyhow::Result<Permission>>;
    fn notify(&self, title: &str, body: &str);
}

/// Whether the client is currently in front of the user. Shared between
/// the input side that flips it and the sessions that read it.
#[derive(Clone, Debug)]
pub struct Visibility(Arc<AtomicBool>);

impl Default for Visibility {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl Visibility {
    pub fn set_visible(&self, visible: bool) {
        self.0.store(visible, Ordering::Release);
    }

    pub fn is_visible(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// Decides whether a chat snapshot deserves a local notification.
#[derive(Debug)]
pub struct NotificationDispatcher {
    viewer_id: String,
    window_ms: i64,
    primed: bool,
    last_id: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(viewer_id: impl Into<String>, window_ms: i64) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            window_ms,
            primed: false,
            last_id: None,
        }
    }

    /// Look at the newest message of a chronologically sorted snapshot.
    /// The first snapshot is history and never notifies; neither does the
    /// same message twice.
    pub fn evaluate(
        &mut self,
        sorted: &[ChatMessage],
        visible: bool,
        now_ms: i64,
    ) -> Option<Notification> {
        let newest = sorted.last();
        if !self.primed {
            self.primed = true;
            self.last_id = newest.map(|m| m.id.clone());
            return None;
        }
        let newest = newest?;
        if self.last_id.as_deref() == Some(newest.id.as_str()) {
            return None;
        }
        self.last_id = Some(newest.id.clone());
        if newest.author_id == self.viewer_id
            || visible
            || now_ms.saturating_sub(newest.sent_at) >= self.window_ms
        {
            return None;
        }
        Some(Notification {
            title: newest.author_name.clone(),
            body: newest.text.clone(),
        })
    }
}

/// Permission-gated delivery of notifications to a [`Notifier`].
pub struct Alerts {
    notifier: Arc<dyn Notifier>,
    visibility: Visibility,
    enabled: bool,
    permission: Mutex<Option<Permission>>,
}

impl Alerts {
    pub fn new(notifier: Arc<dyn Notifier>, visibility: Visibility, enabled: bool) -> Self {
        Self {
            notifier,
            visibility,
            enabled,
            permission: Mutex::new(None),
        }
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn permission(&self) -> Option<Permission> {
        *self.permission.lock()
    }

    /// Ask the notifier for permission unless already granted. Failures
    /// are logged and leave notifications off.
    pub async fn request_permission(&self) {
        if !self.enabled || self.permission() == Some(Permission::Granted) {
            return;
        }
        match self.notifier.request_permission().await {
            Ok(p) => {
                info!(permission = ?p, "notification permission");
                *self.permission.lock() = Some(p);
            }
            Err(err) => warn!("notification permission request failed: {err:#}"),
        }
    }

    /// Show `n` when permitted and the client is hidden. Returns whether it
    /// was shown.
    pub fn show(&self, n: &Notification) -> bool {
        if !self.enabled
            || self.permission() != Some(Permission::Granted)
            || self.visibility.is_visible()
        {
            debug!(title = %n.title, "notification suppressed");
            return false;
        }
        self.notifier.notify(&n.title, &n.body);
        true
    }

    /// Handle a push message received while running. Messages without both
    /// title and body are ignored.
    pub fn foreground(&self, payload: &serde_json::Value) -> bool {
        match serde_json::from_value::<Notification>(payload.clone()) {
            Ok(n) if !n.title.is_empty() && !n.body.is_empty() => self.show(&n),
            _ => {
                debug!("ignoring foreground message without title and body");
                false
            }
        }
    }

    /// Route every foreground message from `rx` through [`Alerts::foreground`].
    /// Install once per process.
    pub fn install_foreground_listener(
        self: &Arc<Self>,
        mut rx: UnboundedReceiver<serde_json::Value>,
    ) -> JoinHandle<()> {
        let alerts = self.clone();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                alerts.foreground(&payload);
            }
        })
    }
}
