use std::sync::Arc;

use serde_json::json;
use store_api::{DocumentStore, NotePatch, NoteRecord, StoreError, Timestamp, NOTES_COLLECTION};
use tracing::debug;

use crate::error::{RoomError, RoomResult};
use crate::model::{decode_snapshot, encode, Identity, Note};
use crate::subscription::Subscription;

/// Shared notes of the rooms, on top of the document store.
#[derive(Clone)]
pub struct NotesChannel {
    store: Arc<dyn DocumentStore>,
}

fn validate(title: &str, content: &str) -> RoomResult<()> {
    if title.trim().is_empty() {
        return Err(RoomError::Validation("note title is empty"));
    }
    if content.trim().is_empty() {
        return Err(RoomError::Validation("note content is empty"));
    }
    Ok(())
}

/// Mutations the store's owner rule refused belong to someone else.
fn mutation_error(err: StoreError) -> RoomError {
    match err {
        StoreError::PermissionDenied(_) => RoomError::Forbidden,
        other => other.into(),
    }
}

impl NotesChannel {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create a note in `room_id`; the creation time is stamped by the
    /// store.
    pub async fn create(
        &self,
        room_id: &str,
        author: &Identity,
        title: &str,
        content: &str,
    ) -> RoomResult<String> {
        validate(title, content)?;
        let record = NoteRecord {
            room_id: room_id.to_string(),
            title: title.trim().to_string(),
            content: content.trim().to_string(),
            user_id: author.uid.clone(),
            user_name: author.label().to_string(),
            created_at: Timestamp::Server,
        };
        let id = self.store.add(NOTES_COLLECTION, encode(&record)?).await?;
        debug!(room = room_id, id = %id, "note created");
        Ok(id)
    }

    /// Replace title and content. `NotFound` when the note was deleted in
    /// the meantime.
    pub async fn update(&self, id: &str, title: &str, content: &str) -> RoomResult<()> {
        validate(title, content)?;
        let patch = NotePatch {
            title: title.trim().to_string(),
            content: content.trim().to_string(),
        };
        self.store
            .update(NOTES_COLLECTION, id, encode(&patch)?)
            .await
            .map_err(mutation_error)?;
        debug!(id, "note updated");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> RoomResult<()> {
        self.store
            .delete(NOTES_COLLECTION, id)
            .await
            .map_err(mutation_error)?;
        debug!(id, "note deleted");
        Ok(())
    }

    /// Receive every note of `room_id` now and whenever that set changes.
    /// Sort with [`sort_newest_first`].
    pub fn subscribe_by_room<S, E>(
        &self,
        room_id: &str,
        mut on_snapshot: S,
        mut on_error: E,
    ) -> Subscription
    where
        S: FnMut(Vec<Note>) + Send + 'static,
        E: FnMut(RoomError) + Send + 'static,
    {
        let feed = self
            .store
            .listen_query(NOTES_COLLECTION, "roomId", &json!(room_id));
        let listener = feed.id;
        let store = self.store.clone();
        Subscription::spawn(
            "notes",
            feed,
            move || store.unlisten_query(listener),
            move |items| on_snapshot(decode_snapshot::<NoteRecord, _>(items, "note")),
            move |err| on_error(err.into()),
        )
    }
}

/// Newest `created_at` first. Notes the store has not stamped yet count as
/// `now_ms`.
pub fn sort_newest_first(notes: &mut [Note], now_ms: i64) {
    notes.sort_by(|a, b| {
        let (ta, tb) = (a.created_at.unwrap_or(now_ms), b.created_at.unwrap_or(now_ms));
        tb.cmp(&ta).then_with(|| b.id.cmp(&a.id))
    });
}
