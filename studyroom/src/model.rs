use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use store_api::{Keyed, MessageRecord, NoteRecord, PresenceRecord};
use time::OffsetDateTime;
use tracing::warn;

/// Current wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Signed-in user as handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: Some(display_name.into()),
            email: None,
        }
    }

    /// Name shown to others: display name, else email, else "Anonymous".
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.email.as_deref().filter(|e| !e.trim().is_empty()))
            .unwrap_or("Anonymous")
    }
}

/// Entry of the room catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Chat event; never changed once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub author_id: String,
    pub author_name: String,
    /// Sender's clock, epoch milliseconds.
    pub sent_at: i64,
}

impl From<Keyed<MessageRecord>> for ChatMessage {
    fn from(k: Keyed<MessageRecord>) -> Self {
        Self {
            id: k.id,
            text: k.value.text,
            author_id: k.value.user_id,
            author_name: k.value.display_name,
            sent_at: k.value.timestamp,
        }
    }
}

/// Shared note owned by one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    pub room_id: String,
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub author_name: String,
    /// Server time of creation; `None` while the server has not stamped it.
    pub created_at: Option<i64>,
}

impl From<Keyed<NoteRecord>> for Note {
    fn from(k: Keyed<NoteRecord>) -> Self {
        Self {
            id: k.id,
            room_id: k.value.room_id,
            title: k.value.title,
            content: k.value.content,
            author_id: k.value.user_id,
            author_name: k.value.user_name,
            created_at: k.value.created_at.millis(),
        }
    }
}

/// "This user is online in this room."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: String,
    pub room_id: String,
    pub display_name: String,
    pub last_seen: Option<i64>,
}

impl From<Keyed<PresenceRecord>> for PresenceEntry {
    fn from(k: Keyed<PresenceRecord>) -> Self {
        Self {
            user_id: k.id,
            room_id: k.value.room_id,
            display_name: k.value.display_name,
            last_seen: k.value.last_seen.millis(),
        }
    }
}

/// The part of the global presence set that is in one room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPresenceView {
    pub room_id: String,
    pub entries: Vec<PresenceEntry>,
}

impl RoomPresenceView {
    /// Filter the global set down to `room_id`, ordered by name.
    pub fn from_global(room_id: &str, all: &[PresenceEntry]) -> Self {
        let mut entries: Vec<PresenceEntry> = all
            .iter()
            .filter(|e| e.room_id == room_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Self {
            room_id: room_id.to_string(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.iter().any(|e| e.user_id == user_id)
    }
}

pub(crate) fn encode<T: Serialize>(record: &T) -> crate::error::RoomResult<Value> {
    serde_json::to_value(record).map_err(|e| crate::error::RoomError::Transport(e.to_string()))
}

/// Decode snapshot children, skipping any that do not match the record
/// shape.
pub(crate) fn decode_snapshot<R, T>(items: Vec<Keyed<Value>>, what: &str) -> Vec<T>
where
    R: DeserializeOwned,
    T: From<Keyed<R>>,
{
    items
        .into_iter()
        .filter_map(|k| match serde_json::from_value::<R>(k.value) {
            Ok(value) => Some(T::from(Keyed { id: k.id, value })),
            Err(err) => {
                warn!(id = %k.id, "skipping malformed {what}: {err}");
                None
            }
        })
        .collect()
}
