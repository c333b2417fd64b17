use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use store_api::{Delivery, Feed, Keyed, StoreError};
use tokio::task::JoinHandle;
use tracing::{debug, error};

struct Active {
    detach: Box<dyn FnOnce() + Send>,
    pump: JoinHandle<()>,
}

/// Live listener handle. Released by [`Subscription::unsubscribe`] or on
/// drop; releasing twice is a no-op.
///
/// A feed that the store closes without a final error is reported as
/// `Disconnected`, so a listener never ends silently.
pub struct Subscription {
    what: &'static str,
    released: Arc<AtomicBool>,
    active: Mutex<Option<Active>>,
}

impl Subscription {
    /// Forward every delivery of `feed` to the callbacks on a background
    /// task. `detach` unregisters the listener from its store.
    pub(crate) fn spawn<S, E>(
        what: &'static str,
        mut feed: Feed,
        detach: impl FnOnce() + Send + 'static,
        mut on_snapshot: S,
        mut on_error: E,
    ) -> Self
    where
        S: FnMut(Vec<Keyed<Value>>) + Send + 'static,
        E: FnMut(StoreError) + Send + 'static,
    {
        let listener = feed.id;
        let released = Arc::new(AtomicBool::new(false));
        let closed_by_us = released.clone();
        let pump = tokio::spawn(async move {
            let mut failed = false;
            while let Some(delivery) = feed.recv().await {
                match delivery {
                    Delivery::Snapshot(items) => {
                        debug!(listener, count = items.len(), "{what} snapshot");
                        on_snapshot(items);
                    }
                    Delivery::Error(err) => {
                        error!(listener, "{what} listener failed: {err}");
                        failed = true;
                        on_error(err);
                    }
                }
            }
            if !failed && !closed_by_us.load(Ordering::SeqCst) {
                error!(listener, "{what} feed closed by the store");
                on_error(StoreError::Disconnected);
            } else {
                debug!(listener, "{what} feed closed");
            }
        });
        Self {
            what,
            released,
            active: Mutex::new(Some(Active {
                detach: Box::new(detach),
                pump,
            })),
        }
    }

    /// Stop receiving snapshots. Returns false when already released.
    pub fn unsubscribe(&self) -> bool {
        let Some(active) = self.active.lock().take() else {
            return false;
        };
        self.released.store(true, Ordering::SeqCst);
        (active.detach)();
        active.pump.abort();
        debug!("{} unsubscribed", self.what);
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("what", &self.what)
            .field("active", &self.is_active())
            .finish()
    }
}
