use std::collections::HashMap;

use serde_json::Value;
use store_api::{Delivery, Keyed, ListenerId, StoreError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::ConnId;

/// What a listener is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Children of a tree path.
    Tree(String),
    /// Documents of a collection.
    Collection(String),
}

impl Topic {
    /// Path used for access checks.
    pub fn path(&self) -> &str {
        match self {
            Topic::Tree(p) | Topic::Collection(p) => p,
        }
    }
}

/// Equality filter of a collection query.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn matches(&self, doc: &Value) -> bool {
        doc.get(&self.field) == Some(&self.value)
    }
}

struct Listener {
    id: ListenerId,
    conn: ConnId,
    filter: Option<Filter>,
    tx: UnboundedSender<Delivery>,
}

/// Fan-out of snapshots to listeners, grouped by topic. Listeners whose
/// receiver is gone are pruned on the next publish.
#[derive(Default)]
pub struct ListenerBus {
    topics: HashMap<Topic, Vec<Listener>>,
    next_id: ListenerId,
}

impl ListenerBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id without registering anything, for feeds that are
    /// closed from the start.
    pub fn reserve_id(&mut self) -> ListenerId {
        self.next_id += 1;
        self.next_id
    }

    /// Register a listener and hand it `initial` as its first delivery.
    pub fn subscribe(
        &mut self,
        topic: Topic,
        conn: ConnId,
        filter: Option<Filter>,
        initial: Vec<Keyed<Value>>,
    ) -> (ListenerId, UnboundedReceiver<Delivery>) {
        let id = self.reserve_id();
        let (tx, rx) = unbounded_channel();
        let _ = tx.send(Delivery::Snapshot(initial));
        self.topics.entry(topic).or_default().push(Listener {
            id,
            conn,
            filter,
            tx,
        });
        (id, rx)
    }

    /// Offer a delivery to every listener on `topic`; `make` decides per
    /// listener filter whether it gets one.
    pub fn publish_with<F>(&mut self, topic: &Topic, mut make: F)
    where
        F: FnMut(Option<&Filter>) -> Option<Vec<Keyed<Value>>>,
    {
        if let Some(list) = self.topics.get_mut(topic) {
            list.retain(|l| match make(l.filter.as_ref()) {
                Some(snapshot) => l.tx.send(Delivery::Snapshot(snapshot)).is_ok(),
                None => !l.tx.is_closed(),
            });
            if list.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    /// Drop a listener. Returns whether it was registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let mut found = false;
        self.topics.retain(|_, list| {
            list.retain(|l| {
                let hit = l.id == id;
                found |= hit;
                !hit
            });
            !list.is_empty()
        });
        found
    }

    /// Drop every listener owned by a connection. Each one gets a final
    /// `Disconnected` error first.
    pub fn drop_connection(&mut self, conn: ConnId) -> usize {
        let mut dropped = 0;
        self.topics.retain(|_, list| {
            list.retain(|l| {
                if l.conn != conn {
                    return true;
                }
                let _ = l.tx.send(Delivery::Error(StoreError::Disconnected));
                dropped += 1;
                false
            });
            !list.is_empty()
        });
        dropped
    }

    /// Push `err` to every listener whose topic path passes `select`, then
    /// drop them.
    pub fn fail_where<P>(&mut self, mut select: P, err: &StoreError) -> usize
    where
        P: FnMut(&Topic) -> bool,
    {
        let mut failed = 0;
        self.topics.retain(|topic, list| {
            if !select(topic) {
                return true;
            }
            for l in list.drain(..) {
                let _ = l.tx.send(Delivery::Error(err.clone()));
                failed += 1;
            }
            false
        });
        failed
    }

    pub fn listener_count(&self) -> usize {
        self.topics.values().map(Vec::len).sum()
    }
}
