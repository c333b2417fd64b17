use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use store_api::{
    Delivery, DocumentStore, EventLogStore, Feed, ListenerId, StoreError, StoreResult,
};
use tokio::sync::mpsc::unbounded_channel;

use crate::{ConnId, Shared};

/// One client's link to a [`crate::MemoryStore`].
///
/// Removal hooks armed through this connection fire when it is
/// disconnected or dropped, whichever comes first.
pub struct Connection {
    id: ConnId,
    auth_uid: Option<String>,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(id: ConnId, auth_uid: Option<String>, shared: Arc<Shared>) -> Self {
        Self {
            id,
            auth_uid,
            shared,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn auth_uid(&self) -> Option<&str> {
        self.auth_uid.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Drop the link without any graceful cleanup, as a crashed client or
    /// a lost network would.
    pub fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.disconnect(self.id);
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StoreError::Disconnected)
        }
    }

    fn dead_feed(&self) -> Feed {
        let (tx, rx) = unbounded_channel();
        let _ = tx.send(Delivery::Error(StoreError::Disconnected));
        Feed { id: 0, rx }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl EventLogStore for Connection {
    fn push<'a>(&'a self, path: &'a str, value: Value) -> BoxFuture<'a, StoreResult<String>> {
        async move {
            self.ensure_open()?;
            let (key, flush) = self.shared.push(path, value)?;
            self.shared.flush(flush).await;
            Ok(key)
        }
        .boxed()
    }

    fn set_ephemeral<'a>(&'a self, path: &'a str, value: Value) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            self.ensure_open()?;
            self.shared.set_ephemeral(self.id, path, value)
        }
        .boxed()
    }

    fn remove<'a>(&'a self, path: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            self.ensure_open()?;
            let flush = self.shared.remove(path)?;
            self.shared.flush(flush).await;
            Ok(())
        }
        .boxed()
    }

    fn listen(&self, path: &str) -> Feed {
        if !self.is_connected() {
            return self.dead_feed();
        }
        self.shared.listen(self.id, path)
    }

    fn unlisten(&self, id: ListenerId) {
        self.shared.unlisten(id);
    }
}

impl DocumentStore for Connection {
    fn add<'a>(&'a self, collection: &'a str, fields: Value) -> BoxFuture<'a, StoreResult<String>> {
        async move {
            self.ensure_open()?;
            let (id, flush) = self.shared.add(collection, fields)?;
            self.shared.flush(flush).await;
            Ok(id)
        }
        .boxed()
    }

    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        patch: Value,
    ) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            self.ensure_open()?;
            let flush = self
                .shared
                .update(self.auth_uid(), collection, id, patch)?;
            self.shared.flush(flush).await;
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            self.ensure_open()?;
            let flush = self.shared.delete(self.auth_uid(), collection, id)?;
            self.shared.flush(flush).await;
            Ok(())
        }
        .boxed()
    }

    fn listen_query(&self, collection: &str, field: &str, value: &Value) -> Feed {
        if !self.is_connected() {
            return self.dead_feed();
        }
        self.shared.listen_query(self.id, collection, field, value)
    }

    fn unlisten_query(&self, id: ListenerId) {
        self.shared.unlisten(id);
    }
}
