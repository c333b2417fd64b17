use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A store timestamp in epoch milliseconds, or one the server has not
/// resolved yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timestamp {
    /// Written as the server placeholder, or read before it was resolved.
    #[default]
    Server,
    Millis(i64),
}

impl Timestamp {
    pub fn millis(self) -> Option<i64> {
        match self {
            Timestamp::Millis(ms) => Some(ms),
            Timestamp::Server => None,
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Timestamp::Millis(ms) => serializer.serialize_i64(*ms),
            Timestamp::Server => crate::server_timestamp().serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let ms = value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64));
        Ok(ms.map(Timestamp::Millis).unwrap_or(Timestamp::Server))
    }
}

/// Chat event stored under `rooms/{room_id}/messages/{push_id}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub text: String,
    pub user_id: String,
    pub display_name: String,
    /// Sender's clock, epoch milliseconds.
    pub timestamp: i64,
}

/// Presence entry stored under `onlineUsers/{user_id}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub display_name: String,
    pub room_id: String,
    #[serde(default)]
    pub last_seen: Timestamp,
}

/// Note document in the `notes` collection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NoteRecord {
    pub room_id: String,
    pub title: String,
    pub content: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub created_at: Timestamp,
}

/// Fields an edit may touch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NotePatch {
    pub title: String,
    pub content: String,
}
