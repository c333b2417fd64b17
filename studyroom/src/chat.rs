use std::sync::Arc;

use store_api::{messages_path, EventLogStore, MessageRecord};
use tracing::debug;

use crate::error::{RoomError, RoomResult};
use crate::model::{decode_snapshot, encode, ChatMessage, Identity};
use crate::subscription::Subscription;

/// Append-only chat stream of one room, on top of the event log store.
#[derive(Clone)]
pub struct ChatChannel {
    store: Arc<dyn EventLogStore>,
}

impl ChatChannel {
    pub fn new(store: Arc<dyn EventLogStore>) -> Self {
        Self { store }
    }

    /// Append a message and return its store id. The sender sees it only
    /// once it comes back through a subscription.
    pub async fn append(
        &self,
        room_id: &str,
        author: &Identity,
        text: &str,
        sent_at: i64,
    ) -> RoomResult<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RoomError::Validation("message text is empty"));
        }
        let record = MessageRecord {
            text: text.to_string(),
            user_id: author.uid.clone(),
            display_name: author.label().to_string(),
            timestamp: sent_at,
        };
        let id = self
            .store
            .push(&messages_path(room_id), encode(&record)?)
            .await?;
        debug!(room = room_id, id = %id, "message appended");
        Ok(id)
    }

    /// Receive the full, unordered message set of `room_id` now and on every
    /// change. Sort with [`sort_chronological`].
    pub fn subscribe<S, E>(&self, room_id: &str, mut on_snapshot: S, mut on_error: E) -> Subscription
    where
        S: FnMut(Vec<ChatMessage>) + Send + 'static,
        E: FnMut(RoomError) + Send + 'static,
    {
        let feed = self.store.listen(&messages_path(room_id));
        let listener = feed.id;
        let store = self.store.clone();
        Subscription::spawn(
            "chat",
            feed,
            move || store.unlisten(listener),
            move |items| on_snapshot(decode_snapshot::<MessageRecord, _>(items, "message")),
            move |err| on_error(err.into()),
        )
    }
}

/// Display order: `sent_at` ascending, store id as tiebreak.
pub fn sort_chronological(messages: &mut [ChatMessage]) {
    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
}
