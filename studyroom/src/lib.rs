//! Realtime core of a multi-room study client: presence, chat, shared notes
//! and chat notifications over an external realtime store.

pub mod app;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod console;
pub mod error;
pub mod identity;
pub mod lobby;
pub mod model;
pub mod notes;
pub mod notify;
pub mod panel;
pub mod presence;
pub mod session;
pub mod subscription;

pub use catalog::RoomCatalog;
pub use chat::ChatChannel;
pub use error::{RoomError, RoomResult};
pub use identity::{IdentityProvider, LocalIdentity};
pub use model::{ChatMessage, Identity, Note, PresenceEntry, Room, RoomPresenceView};
pub use notes::NotesChannel;
pub use notify::{Alerts, Notification, NotificationDispatcher, Notifier, Permission, Visibility};
pub use panel::Panel;
pub use presence::PresenceRegistry;
pub use session::{Client, RoomSession};
pub use subscription::Subscription;
