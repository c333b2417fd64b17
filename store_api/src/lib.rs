//! Boundary between the study room core and the external realtime data
//! service: logical paths, wire records, snapshot delivery and the two store
//! traits (ordered event log tree, mutable document collections).

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

mod records;

pub use records::{MessageRecord, NotePatch, NoteRecord, PresenceRecord, Timestamp};

/// Root of the global presence map, one child per user id.
pub const PRESENCE_ROOT: &str = "onlineUsers";

/// Document collection holding every room's notes.
pub const NOTES_COLLECTION: &str = "notes";

/// Placeholder the store replaces with its own clock on write.
pub const SERVER_TIMESTAMP_KEY: &str = ".sv";

/// Ordered event log for one room's chat.
pub fn messages_path(room_id: &str) -> String {
    format!("rooms/{room_id}/messages")
}

/// Presence entry for one user.
pub fn presence_path(user_id: &str) -> String {
    format!("{PRESENCE_ROOT}/{user_id}")
}

/// The `{".sv":"timestamp"}` placeholder as a JSON value.
pub fn server_timestamp() -> Value {
    serde_json::json!({ SERVER_TIMESTAMP_KEY: "timestamp" })
}

/// Whether a single path segment is usable as a key.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key
            .chars()
            .any(|c| matches!(c, '.' | '$' | '#' | '[' | ']' | '/') || c.is_control())
}

/// Errors reported by a store call or pushed through a listener.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("connection closed")]
    Disconnected,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Identifier of a registered listener, unique per store.
pub type ListenerId = u64;

/// A child of a snapshot together with its store key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyed<T> {
    pub id: String,
    pub value: T,
}

/// What a listener receives: the complete current result set, or an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Snapshot(Vec<Keyed<Value>>),
    Error(StoreError),
}

/// Receiving end of a registered listener.
///
/// The first delivery carries the state at registration time. The channel
/// closes after an error, after `unlisten` or when the connection drops.
#[derive(Debug)]
pub struct Feed {
    pub id: ListenerId,
    pub rx: UnboundedReceiver<Delivery>,
}

impl Feed {
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

/// Tree-shaped realtime store: ordered event logs plus ephemeral entries.
pub trait EventLogStore: Send + Sync {
    /// Append a child under `path` with a fresh, time-ordered key.
    fn push<'a>(&'a self, path: &'a str, value: Value) -> BoxFuture<'a, StoreResult<String>>;

    /// Write `value` at `path` and, in the same step, arm its removal for
    /// when this connection is lost.
    fn set_ephemeral<'a>(&'a self, path: &'a str, value: Value) -> BoxFuture<'a, StoreResult<()>>;

    /// Delete the value at `path`. Deleting an absent value succeeds.
    fn remove<'a>(&'a self, path: &'a str) -> BoxFuture<'a, StoreResult<()>>;

    /// Receive every child of `path` now and after each change.
    fn listen(&self, path: &str) -> Feed;

    /// Stop a listener. Unknown or already removed ids are ignored.
    fn unlisten(&self, id: ListenerId);
}

/// Collection-of-documents store with equality queries.
pub trait DocumentStore: Send + Sync {
    /// Insert a document and return its generated id.
    fn add<'a>(&'a self, collection: &'a str, fields: Value) -> BoxFuture<'a, StoreResult<String>>;

    /// Merge `patch` into an existing document; `NotFound` when it is gone.
    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        patch: Value,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Delete a document. Deleting an absent document succeeds.
    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BoxFuture<'a, StoreResult<()>>;

    /// Receive every document whose `field` equals `value`, now and after
    /// each change to that result set.
    fn listen_query(&self, collection: &str, field: &str, value: &Value) -> Feed;

    /// Stop a query listener. Unknown or already removed ids are ignored.
    fn unlisten_query(&self, id: ListenerId);
}
