use std::sync::Arc;

use store_api::{is_valid_key, presence_path, EventLogStore, PresenceRecord, Timestamp, PRESENCE_ROOT};
use tracing::{debug, info};

use crate::error::{RoomError, RoomResult};
use crate::model::{decode_snapshot, encode, PresenceEntry, RoomPresenceView};
use crate::subscription::Subscription;

/// Global "who is online where" map. One entry per user; entering a room
/// overwrites the previous entry.
#[derive(Clone)]
pub struct PresenceRegistry {
    store: Arc<dyn EventLogStore>,
}

impl PresenceRegistry {
    pub fn new(store: Arc<dyn EventLogStore>) -> Self {
        Self { store }
    }

    /// Mark `user_id` online in `room_id`. The store removes the entry on
    /// its own if this connection is lost.
    pub async fn enter(&self, user_id: &str, room_id: &str, display_name: &str) -> RoomResult<()> {
        if !is_valid_key(user_id) {
            return Err(RoomError::Validation("invalid user id"));
        }
        let record = PresenceRecord {
            display_name: display_name.to_string(),
            room_id: room_id.to_string(),
            last_seen: Timestamp::Server,
        };
        self.store
            .set_ephemeral(&presence_path(user_id), encode(&record)?)
            .await?;
        info!(user = user_id, room = room_id, "presence entered");
        Ok(())
    }

    /// Remove the entry of `user_id`. Succeeds when it is already gone.
    pub async fn leave(&self, user_id: &str) -> RoomResult<()> {
        if !is_valid_key(user_id) {
            return Err(RoomError::Validation("invalid user id"));
        }
        self.store.remove(&presence_path(user_id)).await?;
        debug!(user = user_id, "presence left");
        Ok(())
    }

    /// Receive the whole global presence set now and on every change.
    pub fn subscribe_all<S, E>(&self, mut on_snapshot: S, mut on_error: E) -> Subscription
    where
        S: FnMut(Vec<PresenceEntry>) + Send + 'static,
        E: FnMut(RoomError) + Send + 'static,
    {
        let feed = self.store.listen(PRESENCE_ROOT);
        let listener = feed.id;
        let store = self.store.clone();
        Subscription::spawn(
            "presence",
            feed,
            move || store.unlisten(listener),
            move |items| on_snapshot(decode_snapshot::<PresenceRecord, _>(items, "presence entry")),
            move |err| on_error(err.into()),
        )
    }

    /// Entries of the global set that are in `room_id`.
    pub fn room_view(all: &[PresenceEntry], room_id: &str) -> RoomPresenceView {
        RoomPresenceView::from_global(room_id, all)
    }
}
