//! In-process stand-in for the realtime data service: a JSON tree with
//! ordered push keys and connection-scoped removal hooks, plus document
//! collections with equality queries. Every listener receives full
//! snapshots.

pub mod bus;
pub mod connection;
pub mod documents;
pub mod persist;
pub mod push_id;
pub mod rules;
pub mod tree;

pub use connection::Connection;
pub use rules::Rules;

use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use store_api::{is_valid_key, Delivery, Feed, ListenerId, StoreError, StoreResult};
use time::OffsetDateTime;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, warn};
use uuid::Uuid;

use bus::{Filter, ListenerBus, Topic};
use documents::Documents;
use persist::{Dump, Persistence};
use push_id::PushIds;
use tree::{normalize, resolve_server_values, split_path, Tree};

/// Identifier of a client connection.
pub type ConnId = u64;

/// Current wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Bytes to write for a given state generation.
type Flush = Option<(u64, Vec<u8>)>;

struct State {
    tree: Tree,
    docs: Documents,
    bus: ListenerBus,
    /// Full paths to remove when the owning connection drops.
    hooks: HashMap<ConnId, BTreeSet<String>>,
    ids: PushIds,
    rules: Rules,
    generation: u64,
}

impl State {
    fn new(rules: Rules, dump: Dump) -> Self {
        Self {
            tree: dump.tree,
            docs: dump.documents,
            bus: ListenerBus::new(),
            hooks: HashMap::new(),
            ids: PushIds::new(),
            rules,
            generation: 0,
        }
    }

    fn publish_tree(&mut self, parent: &str) {
        let snapshot = self.tree.children(parent);
        self.bus
            .publish_with(&Topic::Tree(parent.to_string()), |_| Some(snapshot.clone()));
    }

    fn publish_docs(&mut self, collection: &str, before: Option<&Value>, after: Option<&Value>) {
        let docs = &self.docs;
        self.bus
            .publish_with(&Topic::Collection(collection.to_string()), |filter| {
                let touched = match filter {
                    None => true,
                    Some(f) => {
                        before.is_some_and(|d| f.matches(d)) || after.is_some_and(|d| f.matches(d))
                    }
                };
                touched.then(|| docs.query(collection, filter))
            });
    }

    fn closed_feed(&mut self, err: StoreError) -> Feed {
        let id = self.bus.reserve_id();
        let (tx, rx) = unbounded_channel();
        let _ = tx.send(Delivery::Error(err));
        Feed { id, rx }
    }

    fn dump_bytes(&self) -> Option<Vec<u8>> {
        let armed: BTreeSet<String> = self.hooks.values().flatten().cloned().collect();
        let dump = Dump {
            tree: self.tree.without(&armed),
            documents: self.docs.clone(),
        };
        match serde_json::to_vec_pretty(&dump) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!("failed to serialize store: {err}");
                None
            }
        }
    }
}

pub(crate) struct Shared {
    state: Mutex<State>,
    persist: Option<Persistence>,
    next_conn: AtomicU64,
}

impl Shared {
    fn new(rules: Rules, dump: Dump, persist: Option<Persistence>) -> Self {
        Self {
            state: Mutex::new(State::new(rules, dump)),
            persist,
            next_conn: AtomicU64::new(1),
        }
    }

    fn durable(&self, state: &mut State) -> Flush {
        self.persist.as_ref()?;
        state.generation += 1;
        state.dump_bytes().map(|bytes| (state.generation, bytes))
    }

    pub(crate) async fn flush(&self, pending: Flush) {
        if let (Some(persist), Some((generation, bytes))) = (&self.persist, pending) {
            if let Err(err) = persist.write(generation, bytes).await {
                warn!("store not persisted to {}: {err:#}", persist.file().display());
            }
        }
    }

    pub(crate) fn push(&self, path: &str, mut value: Value) -> StoreResult<(String, Flush)> {
        let parent = normalize(path)?;
        let mut state = self.state.lock();
        state.rules.check_path(&parent)?;
        let now = now_ms();
        resolve_server_values(&mut value, now);
        let key = state.ids.next(now);
        state.tree.insert(&parent, &key, value);
        state.publish_tree(&parent);
        let flush = self.durable(&mut state);
        Ok((key, flush))
    }

    pub(crate) fn set_ephemeral(&self, conn: ConnId, path: &str, mut value: Value) -> StoreResult<()> {
        let (parent, key) = split_path(path)?;
        let full = format!("{parent}/{key}");
        let mut state = self.state.lock();
        state.rules.check_path(&full)?;
        resolve_server_values(&mut value, now_ms());
        // write and arm under one lock: no window where the entry exists
        // without its removal hook
        state.tree.insert(&parent, &key, value);
        state.hooks.entry(conn).or_default().insert(full);
        state.publish_tree(&parent);
        Ok(())
    }

    pub(crate) fn remove(&self, path: &str) -> StoreResult<Flush> {
        let (parent, key) = split_path(path)?;
        let mut state = self.state.lock();
        state.rules.check_path(&format!("{parent}/{key}"))?;
        if state.tree.remove(&parent, &key).is_none() {
            return Ok(None);
        }
        state.publish_tree(&parent);
        Ok(self.durable(&mut state))
    }

    pub(crate) fn listen(&self, conn: ConnId, path: &str) -> Feed {
        let mut state = self.state.lock();
        let parent = match normalize(path).and_then(|p| state.rules.check_path(&p).map(|_| p)) {
            Ok(parent) => parent,
            Err(err) => return state.closed_feed(err),
        };
        let initial = state.tree.children(&parent);
        let (id, rx) = state.bus.subscribe(Topic::Tree(parent), conn, None, initial);
        Feed { id, rx }
    }

    pub(crate) fn unlisten(&self, id: ListenerId) {
        self.state.lock().bus.remove(id);
    }

    pub(crate) fn add(&self, collection: &str, mut fields: Value) -> StoreResult<(String, Flush)> {
        check_collection(collection)?;
        if !fields.is_object() {
            return Err(StoreError::Transport("document must be an object".into()));
        }
        let mut state = self.state.lock();
        state.rules.check_path(collection)?;
        resolve_server_values(&mut fields, now_ms());
        let id = Uuid::new_v4().simple().to_string();
        state.docs.insert(collection, &id, fields.clone());
        state.publish_docs(collection, None, Some(&fields));
        let flush = self.durable(&mut state);
        Ok((id, flush))
    }

    pub(crate) fn update(
        &self,
        auth: Option<&str>,
        collection: &str,
        id: &str,
        mut patch: Value,
    ) -> StoreResult<Flush> {
        check_collection(collection)?;
        let mut state = self.state.lock();
        state.rules.check_path(collection)?;
        let before = state
            .docs
            .get(collection, id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{collection}/{id}")))?;
        state.rules.check_owner(collection, &before, auth)?;
        resolve_server_values(&mut patch, now_ms());
        let Value::Object(patch) = patch else {
            return Err(StoreError::Transport("patch must be an object".into()));
        };
        let after = state
            .docs
            .merge(collection, id, patch)
            .ok_or_else(|| StoreError::NotFound(format!("{collection}/{id}")))?;
        state.publish_docs(collection, Some(&before), Some(&after));
        Ok(self.durable(&mut state))
    }

    pub(crate) fn delete(&self, auth: Option<&str>, collection: &str, id: &str) -> StoreResult<Flush> {
        check_collection(collection)?;
        let mut state = self.state.lock();
        state.rules.check_path(collection)?;
        let Some(before) = state.docs.get(collection, id).cloned() else {
            return Ok(None);
        };
        state.rules.check_owner(collection, &before, auth)?;
        state.docs.remove(collection, id);
        state.publish_docs(collection, Some(&before), None);
        Ok(self.durable(&mut state))
    }

    pub(crate) fn listen_query(&self, conn: ConnId, collection: &str, field: &str, value: &Value) -> Feed {
        let mut state = self.state.lock();
        if let Err(err) = check_collection(collection).and_then(|_| state.rules.check_path(collection)) {
            return state.closed_feed(err);
        }
        let filter = Filter {
            field: field.to_string(),
            value: value.clone(),
        };
        let initial = state.docs.query(collection, Some(&filter));
        let (id, rx) = state.bus.subscribe(
            Topic::Collection(collection.to_string()),
            conn,
            Some(filter),
            initial,
        );
        Feed { id, rx }
    }

    pub(crate) fn disconnect(&self, conn: ConnId) {
        let mut state = self.state.lock();
        let dropped = state.bus.drop_connection(conn);
        let armed = state.hooks.remove(&conn).unwrap_or_default();
        let mut fired = 0;
        for full in armed {
            if let Some((parent, key)) = full.rsplit_once('/') {
                if state.tree.remove(parent, key).is_some() {
                    state.publish_tree(parent);
                    fired += 1;
                }
            }
        }
        debug!(conn, dropped, fired, "connection closed");
    }
}

fn check_collection(collection: &str) -> StoreResult<()> {
    if is_valid_key(collection) {
        Ok(())
    } else {
        Err(StoreError::Transport(format!(
            "invalid collection: {collection:?}"
        )))
    }
}

/// Handle to one in-process realtime service. Cheap to clone; every clone
/// sees the same data.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store without access rules.
    pub fn new() -> Self {
        Self::with_rules(Rules::new())
    }

    pub fn with_rules(rules: Rules) -> Self {
        Self {
            shared: Arc::new(Shared::new(rules, Dump::default(), None)),
        }
    }

    /// Store backed by a JSON file, loaded now and rewritten after every
    /// durable change.
    pub async fn open(file: impl Into<PathBuf>, rules: Rules) -> Result<Self> {
        let (persist, dump) = Persistence::load(file.into()).await?;
        Ok(Self {
            shared: Arc::new(Shared::new(rules, dump, Some(persist))),
        })
    }

    /// Open a client connection, optionally authenticated as `auth_uid`.
    pub fn connect(&self, auth_uid: Option<&str>) -> Connection {
        let id = self.shared.next_conn.fetch_add(1, Ordering::Relaxed);
        debug!(conn = id, auth = ?auth_uid, "connection opened");
        Connection::new(id, auth_uid.map(str::to_string), self.shared.clone())
    }

    /// Revoke access to `prefix`: live listeners below it receive
    /// `PermissionDenied` and stop, later calls fail.
    pub fn deny(&self, prefix: &str) {
        let mut state = self.shared.state.lock();
        state.rules.add_denied(prefix);
        let prefix = prefix.trim_matches('/');
        let err = StoreError::PermissionDenied(prefix.to_string());
        let failed = state
            .bus
            .fail_where(|topic| rules::covers(prefix, topic.path()), &err);
        debug!(prefix, failed, "access revoked");
    }

    /// Value at a full tree path.
    pub fn read(&self, path: &str) -> Option<Value> {
        let (parent, key) = split_path(path).ok()?;
        self.shared.state.lock().tree.get(&parent, &key).cloned()
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.shared.state.lock().docs.get(collection, id).cloned()
    }

    pub fn listener_count(&self) -> usize {
        self.shared.state.lock().bus.listener_count()
    }
}
