//! Room session: everything a user holds while inside one room.
//!
//! Entering acquires a presence entry and three listeners (chat, notes,
//! presence). Leaving, losing the identity or dropping the session releases
//! all of them exactly once.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use store_api::{DocumentStore, EventLogStore};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::RoomCatalog;
use crate::chat::{sort_chronological, ChatChannel};
use crate::error::{RoomError, RoomResult};
use crate::lobby::Lobby;
use crate::model::{now_ms, ChatMessage, Identity, Note, PresenceEntry, Room};
use crate::notes::{sort_newest_first, NotesChannel};
use crate::notify::{Alerts, NotificationDispatcher};
use crate::panel::{Panel, PanelTx};
use crate::presence::PresenceRegistry;
use crate::subscription::Subscription;

/// Presence leaves running in the background after a session was dropped
/// or lost its identity. The next `enter` waits for them so a stale leave
/// cannot remove the new entry.
#[derive(Clone, Default)]
struct PendingLeaves(Arc<Mutex<Vec<JoinHandle<()>>>>);

impl PendingLeaves {
    fn push(&self, handle: JoinHandle<()>) {
        let mut pending = self.0.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    async fn settle(&self) {
        let pending = std::mem::take(&mut *self.0.lock());
        for handle in pending {
            if let Err(err) = handle.await {
                warn!("background presence leave did not finish: {err}");
            }
        }
    }
}

/// Store-facing services shared by every session of one client.
#[derive(Clone)]
pub struct Client {
    chat: ChatChannel,
    notes: NotesChannel,
    presence: PresenceRegistry,
    catalog: Arc<RoomCatalog>,
    alerts: Arc<Alerts>,
    window_ms: i64,
    pending: PendingLeaves,
}

impl Client {
    /// Client whose three channels share one store connection.
    pub fn new<S>(store: Arc<S>, catalog: RoomCatalog, alerts: Arc<Alerts>, window_ms: i64) -> Self
    where
        S: EventLogStore + DocumentStore + 'static,
    {
        Self::from_parts(
            ChatChannel::new(store.clone()),
            NotesChannel::new(store.clone()),
            PresenceRegistry::new(store),
            catalog,
            alerts,
            window_ms,
        )
    }

    pub fn from_parts(
        chat: ChatChannel,
        notes: NotesChannel,
        presence: PresenceRegistry,
        catalog: RoomCatalog,
        alerts: Arc<Alerts>,
        window_ms: i64,
    ) -> Self {
        Self {
            chat,
            notes,
            presence,
            catalog: Arc::new(catalog),
            alerts,
            window_ms,
            pending: PendingLeaves::default(),
        }
    }

    pub fn catalog(&self) -> &RoomCatalog {
        &self.catalog
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn alerts(&self) -> &Arc<Alerts> {
        &self.alerts
    }

    pub fn lobby(&self) -> Lobby {
        Lobby::open(&self.presence, self.catalog.clone())
    }

    /// Enter `room_id` as the identity currently held by `identity`.
    ///
    /// Only a missing identity or an unknown room fail; a failed presence
    /// write is logged and shown on the presence panel.
    pub async fn enter(
        &self,
        room_id: &str,
        mut identity: watch::Receiver<Option<Identity>>,
    ) -> RoomResult<RoomSession> {
        let room = self
            .catalog
            .get(room_id)
            .cloned()
            .ok_or_else(|| RoomError::UnknownRoom(room_id.to_string()))?;
        let who = identity
            .borrow_and_update()
            .clone()
            .ok_or(RoomError::IdentityLost)?;

        self.alerts.request_permission().await;

        let (chat_tx, _) = PanelTx::<ChatMessage>::channel();
        let (notes_tx, _) = PanelTx::<Note>::channel();
        let (presence_tx, _) = PanelTx::<PresenceEntry>::channel();

        self.pending.settle().await;
        if let Err(err) = self.presence.enter(&who.uid, &room.id, who.label()).await {
            warn!(room = %room.id, "presence not registered: {err}");
            presence_tx.error(err);
        }

        let resources = Resources {
            chat: self.subscribe_chat(&room, &who, &chat_tx),
            notes: self.subscribe_notes(&room, &notes_tx),
            presence: self.subscribe_presence(&room, &presence_tx),
        };
        let inner = Arc::new(Inner {
            room,
            identity: who,
            identity_rx: identity.clone(),
            client: self.clone(),
            resources: Mutex::new(Some(resources)),
            chat_tx,
            notes_tx,
            presence_tx,
        });
        let guard = CancellationToken::new();
        spawn_identity_guard(Arc::downgrade(&inner), identity, guard.clone());
        info!(room = %inner.room.id, uid = %inner.identity.uid, "entered room");
        Ok(RoomSession { inner, guard })
    }

    fn subscribe_chat(&self, room: &Room, who: &Identity, tx: &PanelTx<ChatMessage>) -> Subscription {
        let mut dispatcher = NotificationDispatcher::new(who.uid.clone(), self.window_ms);
        let alerts = self.alerts.clone();
        let (items, errors) = (tx.clone(), tx.clone());
        self.chat.subscribe(
            &room.id,
            move |mut messages| {
                sort_chronological(&mut messages);
                let visible = alerts.visibility().is_visible();
                if let Some(n) = dispatcher.evaluate(&messages, visible, now_ms()) {
                    alerts.show(&n);
                }
                items.items(messages);
            },
            move |err| errors.error(err),
        )
    }

    fn subscribe_notes(&self, room: &Room, tx: &PanelTx<Note>) -> Subscription {
        let (items, errors) = (tx.clone(), tx.clone());
        self.notes.subscribe_by_room(
            &room.id,
            move |mut notes| {
                sort_newest_first(&mut notes, now_ms());
                items.items(notes);
            },
            move |err| errors.error(err),
        )
    }

    fn subscribe_presence(&self, room: &Room, tx: &PanelTx<PresenceEntry>) -> Subscription {
        let (items, errors) = (tx.clone(), tx.clone());
        let room_id = room.id.clone();
        self.presence.subscribe_all(
            move |all| items.items(PresenceRegistry::room_view(&all, &room_id).entries),
            move |err| errors.error(err),
        )
    }
}

struct Resources {
    chat: Subscription,
    notes: Subscription,
    presence: Subscription,
}

impl Resources {
    fn release(self) {
        self.chat.unsubscribe();
        self.notes.unsubscribe();
        self.presence.unsubscribe();
    }
}

struct Inner {
    room: Room,
    identity: Identity,
    identity_rx: watch::Receiver<Option<Identity>>,
    client: Client,
    resources: Mutex<Option<Resources>>,
    chat_tx: PanelTx<ChatMessage>,
    notes_tx: PanelTx<Note>,
    presence_tx: PanelTx<PresenceEntry>,
}

impl Inner {
    fn take_resources(&self) -> Option<Resources> {
        self.resources.lock().take()
    }

    fn is_active(&self) -> bool {
        self.resources.lock().is_some()
    }

    /// Release listeners, then remove the presence entry. Runs once.
    async fn teardown(&self, reason: &'static str) -> bool {
        let Some(resources) = self.take_resources() else {
            return false;
        };
        resources.release();
        if let Err(err) = self.client.presence.leave(&self.identity.uid).await {
            warn!(room = %self.room.id, "presence cleanup failed: {err}");
        }
        info!(room = %self.room.id, reason, "left room");
        true
    }

    /// Release listeners now and leave presence on a background task that
    /// the client's next `enter` waits for.
    fn teardown_detached(&self, reason: &'static str) {
        let Some(resources) = self.take_resources() else {
            return;
        };
        resources.release();
        let presence = self.client.presence.clone();
        let uid = self.identity.uid.clone();
        let room = self.room.id.clone();
        match Handle::try_current() {
            Ok(handle) => {
                let leave = handle.spawn(async move {
                    if let Err(err) = presence.leave(&uid).await {
                        warn!(room = %room, "presence cleanup failed: {err}");
                    }
                    info!(room = %room, reason, "left room");
                });
                self.client.pending.push(leave);
            }
            Err(_) => warn!(room = %room, "no runtime to leave room; relying on disconnect cleanup"),
        }
    }
}

fn spawn_identity_guard(
    inner: Weak<Inner>,
    mut rx: watch::Receiver<Option<Identity>>,
    token: CancellationToken,
) {
    let Some(uid) = inner.upgrade().map(|i| i.identity.uid.clone()) else {
        return;
    };
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                changed = rx.changed() => {
                    let lost = match changed {
                        Err(_) => true,
                        Ok(()) => rx.borrow_and_update().as_ref().map_or(true, |i| i.uid != uid),
                    };
                    if lost {
                        if let Some(inner) = inner.upgrade() {
                            inner.teardown_detached("identity lost");
                        }
                        return;
                    }
                }
            }
        }
    });
}

/// An active room visit. See the module docs for the release rules.
pub struct RoomSession {
    inner: Arc<Inner>,
    guard: CancellationToken,
}

impl RoomSession {
    pub fn room(&self) -> &Room {
        &self.inner.room
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn chat(&self) -> watch::Receiver<Panel<ChatMessage>> {
        self.inner.chat_tx.subscribe()
    }

    pub fn notes(&self) -> watch::Receiver<Panel<Note>> {
        self.inner.notes_tx.subscribe()
    }

    /// Who is in this room.
    pub fn presence(&self) -> watch::Receiver<Panel<PresenceEntry>> {
        self.inner.presence_tx.subscribe()
    }

    fn ensure_active(&self) -> RoomResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(RoomError::Inactive)
        }
    }

    /// Send a chat message. It shows up once the chat panel's next
    /// snapshot contains it.
    pub async fn send(&self, text: &str) -> RoomResult<String> {
        self.ensure_active()?;
        let res = self
            .inner
            .client
            .chat
            .append(&self.inner.room.id, &self.inner.identity, text, now_ms())
            .await;
        if let Err(err @ RoomError::Transport(_)) = &res {
            self.inner.chat_tx.error(err.clone());
        }
        res
    }

    pub async fn add_note(&self, title: &str, content: &str) -> RoomResult<String> {
        self.ensure_active()?;
        let res = self
            .inner
            .client
            .notes
            .create(&self.inner.room.id, &self.inner.identity, title, content)
            .await;
        if let Err(err @ RoomError::Transport(_)) = &res {
            self.inner.notes_tx.error(err.clone());
        }
        res
    }

    /// Author of `note_id` as last seen on the notes panel.
    fn author_of(&self, note_id: &str) -> Option<String> {
        self.inner.notes_tx.with(|p| {
            p.items
                .iter()
                .find(|n| n.id == note_id)
                .map(|n| n.author_id.clone())
        })
    }

    /// Rejects notes the panel shows under another author. Notes the panel
    /// has not seen yet go to the store, whose owner rule decides.
    fn check_author(&self, note_id: &str) -> RoomResult<()> {
        match self.author_of(note_id) {
            Some(author) if author != self.inner.identity.uid => Err(RoomError::Forbidden),
            _ => Ok(()),
        }
    }

    /// Edit one of the user's own notes. `NotFound` when it vanished.
    pub async fn edit_note(&self, note_id: &str, title: &str, content: &str) -> RoomResult<()> {
        self.ensure_active()?;
        self.check_author(note_id)?;
        let res = self.inner.client.notes.update(note_id, title, content).await;
        if let Err(err @ RoomError::Transport(_)) = &res {
            self.inner.notes_tx.error(err.clone());
        }
        res
    }

    /// Delete one of the user's own notes. Deleting a note that is already
    /// gone succeeds.
    pub async fn delete_note(&self, note_id: &str) -> RoomResult<()> {
        self.ensure_active()?;
        self.check_author(note_id)?;
        let res = self.inner.client.notes.delete(note_id).await;
        if let Err(err @ RoomError::Transport(_)) = &res {
            self.inner.notes_tx.error(err.clone());
        }
        res
    }

    /// Leave the room. Returns false when the session had already ended.
    pub async fn leave(&self) -> bool {
        self.guard.cancel();
        self.inner.teardown("leave").await
    }

    /// Leave this room, then enter `room_id` with the same identity source.
    pub async fn switch(self, room_id: &str) -> RoomResult<RoomSession> {
        if !self.inner.client.catalog.contains(room_id) {
            return Err(RoomError::UnknownRoom(room_id.to_string()));
        }
        self.leave().await;
        let client = self.inner.client.clone();
        let identity = self.inner.identity_rx.clone();
        drop(self);
        client.enter(room_id, identity).await
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.guard.cancel();
        self.inner.teardown_detached("dropped");
    }
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("room", &self.inner.room.id)
            .field("uid", &self.inner.identity.uid)
            .field("active", &self.is_active())
            .finish()
    }
}
