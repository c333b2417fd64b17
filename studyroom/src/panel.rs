use std::sync::Arc;

use tokio::sync::watch;

use crate::error::RoomError;

/// Latest state of one view: the items, whether the first snapshot
/// arrived, and a persistent error banner.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel<T> {
    pub items: Vec<T>,
    pub loaded: bool,
    pub error: Option<RoomError>,
}

impl<T> Default for Panel<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loaded: false,
            error: None,
        }
    }
}

/// Writing side of a panel, shared by the callbacks that feed it.
pub(crate) struct PanelTx<T>(Arc<watch::Sender<Panel<T>>>);

impl<T> Clone for PanelTx<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> PanelTx<T> {
    pub(crate) fn channel() -> (Self, watch::Receiver<Panel<T>>) {
        let (tx, rx) = watch::channel(Panel::default());
        (Self(Arc::new(tx)), rx)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Panel<T>> {
        self.0.subscribe()
    }

    pub(crate) fn items(&self, items: Vec<T>) {
        self.0.send_modify(|p| {
            p.items = items;
            p.loaded = true;
        });
    }

    pub(crate) fn error(&self, err: RoomError) {
        self.0.send_modify(|p| p.error = Some(err));
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&Panel<T>) -> R) -> R {
        f(&self.0.borrow())
    }
}
