mod common;

use common::{eventually, peer, store, wait_panel};
use realtime_store::MemoryStore;
use studyroom::{IdentityProvider, LocalIdentity, NotesChannel, RoomError};
use tokio::time::{sleep, Duration};

fn presence_of(store: &MemoryStore, uid: &str) -> Option<serde_json::Value> {
    store.read(&format!("onlineUsers/{uid}"))
}

#[tokio::test]
async fn math_101_walkthrough() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let session = alice.client.enter("math-101", alice.watch()).await.unwrap();

    let mut who = session.presence();
    let panel = wait_panel(&mut who, |p| p.items.len() == 1).await;
    assert_eq!(panel.items[0].room_id, "math-101");
    assert_eq!(panel.items[0].display_name, "Alice");

    session.send("hi").await.unwrap();
    let mut chat = session.chat();
    let panel = wait_panel(&mut chat, |p| p.items.len() == 1).await;
    assert_eq!(panel.items[0].text, "hi");
    assert_eq!(panel.items[0].author_id, "alice");

    session.add_note("T", "C").await.unwrap();
    let mut notes = session.notes();
    let panel = wait_panel(&mut notes, |p| p.items.len() == 1).await;
    let note = &panel.items[0];
    assert_eq!((note.title.as_str(), note.content.as_str()), ("T", "C"));
    assert_eq!(note.author_id, "alice");
    assert!(note.created_at.is_some());

    assert!(session.leave().await);
    assert!(presence_of(&store, "alice").is_none());

    // messages and notes outlive presence
    let bob = peer(&store, "bob", "Bob");
    let lobby = bob.client.lobby();
    let mut rooms = lobby.panel();
    let panel = wait_panel(&mut rooms, |p| p.loaded).await;
    assert!(panel.items.iter().all(|o| o.online == 0));
    let again = bob.client.enter("math-101", bob.watch()).await.unwrap();
    let mut chat = again.chat();
    assert_eq!(wait_panel(&mut chat, |p| p.loaded).await.items.len(), 1);
    let mut notes = again.notes();
    assert_eq!(wait_panel(&mut notes, |p| p.loaded).await.items.len(), 1);
}

#[tokio::test]
async fn leave_releases_everything_once() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    assert_eq!(store.listener_count(), 0);
    let session = alice.client.enter("cs-301", alice.watch()).await.unwrap();
    assert_eq!(store.listener_count(), 3);
    assert!(presence_of(&store, "alice").is_some());

    assert!(session.leave().await);
    assert!(!session.leave().await);
    assert!(!session.is_active());
    assert_eq!(store.listener_count(), 0);
    assert!(presence_of(&store, "alice").is_none());
    assert_eq!(session.send("late").await, Err(RoomError::Inactive));
}

#[tokio::test]
async fn switching_rooms_tears_down_before_entering() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let session = alice.client.enter("math-101", alice.watch()).await.unwrap();
    let session = session.switch("physics-201").await.unwrap();
    assert_eq!(session.room().id, "physics-201");
    assert_eq!(store.listener_count(), 3);
    let entry = presence_of(&store, "alice").unwrap();
    assert_eq!(entry["roomId"], "physics-201");

    let mut who = session.presence();
    let panel = wait_panel(&mut who, |p| p.loaded).await;
    assert_eq!(panel.items.len(), 1);

    assert!(matches!(
        session.switch("nowhere").await,
        Err(RoomError::UnknownRoom(_))
    ));
}

#[tokio::test]
async fn losing_identity_ends_the_session() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let session = alice.client.enter("math-101", alice.watch()).await.unwrap();
    assert!(presence_of(&store, "alice").is_some());

    alice.ids.logout();
    assert!(eventually(|| !session.is_active()).await);
    assert!(eventually(|| presence_of(&store, "alice").is_none()).await);
    assert_eq!(store.listener_count(), 0);
    // explicit leave after the automatic one is a no-op
    assert!(!session.leave().await);
}

#[tokio::test]
async fn entering_requires_identity_and_known_room() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    assert!(matches!(
        alice.client.enter("art-999", alice.watch()).await,
        Err(RoomError::UnknownRoom(_))
    ));
    let nobody = LocalIdentity::new(None);
    assert!(matches!(
        alice.client.enter("math-101", nobody.watch()).await,
        Err(RoomError::IdentityLost)
    ));
    assert_eq!(store.listener_count(), 0);
}

#[tokio::test]
async fn dropping_a_session_still_cleans_up() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let session = alice.client.enter("biology-201", alice.watch()).await.unwrap();
    drop(session);
    assert_eq!(store.listener_count(), 0);
    assert!(eventually(|| presence_of(&store, "alice").is_none()).await);
}

#[tokio::test]
async fn entering_after_a_drop_keeps_the_new_entry() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let session = alice.client.enter("math-101", alice.watch()).await.unwrap();
    drop(session);
    let next = alice.client.enter("cs-301", alice.watch()).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    assert!(next.is_active());
    let entry = presence_of(&store, "alice").expect("entry for the new room");
    assert_eq!(entry["roomId"], "cs-301");
    let mut who = next.presence();
    let panel = wait_panel(&mut who, |p| p.items.len() == 1).await;
    assert_eq!(panel.items[0].room_id, "cs-301");
}

#[tokio::test]
async fn losing_the_connection_marks_every_panel() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let session = alice.client.enter("math-101", alice.watch()).await.unwrap();
    let (mut chat, mut notes, mut who) = (session.chat(), session.notes(), session.presence());
    wait_panel(&mut chat, |p| p.loaded).await;

    alice.conn.disconnect();
    let disconnected = |e: &Option<RoomError>| matches!(e, Some(RoomError::Transport(_)));
    wait_panel(&mut chat, |p| disconnected(&p.error)).await;
    wait_panel(&mut notes, |p| disconnected(&p.error)).await;
    wait_panel(&mut who, |p| disconnected(&p.error)).await;
}

#[tokio::test]
async fn ungraceful_disconnect_clears_presence_for_others() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let bob = peer(&store, "bob", "Bob");
    let _a = alice.client.enter("math-101", alice.watch()).await.unwrap();
    let b = bob.client.enter("math-101", bob.watch()).await.unwrap();
    let mut who = b.presence();
    wait_panel(&mut who, |p| p.items.len() == 2).await;

    alice.conn.disconnect();
    let panel = wait_panel(&mut who, |p| p.items.len() == 1).await;
    assert_eq!(panel.items[0].user_id, "bob");
}

#[tokio::test]
async fn listener_failure_only_marks_its_own_panel() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let session = alice.client.enter("math-101", alice.watch()).await.unwrap();
    let mut notes = session.notes();
    wait_panel(&mut notes, |p| p.loaded).await;

    store.deny("rooms/math-101");
    let mut chat = session.chat();
    let panel = wait_panel(&mut chat, |p| p.error.is_some()).await;
    assert!(matches!(panel.error, Some(RoomError::Transport(_))));
    assert!(session.notes().borrow().error.is_none());

    assert!(matches!(session.send("hi").await, Err(RoomError::Transport(_))));
    session.add_note("still", "works").await.unwrap();
    let panel = wait_panel(&mut notes, |p| p.items.len() == 1).await;
    assert!(panel.error.is_none());
    assert!(session.leave().await);
}

#[tokio::test]
async fn only_the_author_may_change_a_note() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let bob = peer(&store, "bob", "Bob");
    let a = alice.client.enter("cs-301", alice.watch()).await.unwrap();
    let b = bob.client.enter("cs-301", bob.watch()).await.unwrap();

    let id = a.add_note("Graphs", "BFS vs DFS").await.unwrap();
    let mut notes = b.notes();
    wait_panel(&mut notes, |p| p.items.iter().any(|n| n.id == id)).await;
    assert_eq!(b.edit_note(&id, "x", "y").await, Err(RoomError::Forbidden));
    assert_eq!(b.delete_note(&id).await, Err(RoomError::Forbidden));

    let mut mine = a.notes();
    wait_panel(&mut mine, |p| p.items.iter().any(|n| n.id == id)).await;
    a.edit_note(&id, "Graphs", "BFS, DFS and Dijkstra").await.unwrap();
    let panel = wait_panel(&mut notes, |p| {
        p.items.iter().any(|n| n.content == "BFS, DFS and Dijkstra")
    })
    .await;
    assert_eq!(panel.items[0].author_name, "Alice");

    a.delete_note(&id).await.unwrap();
    wait_panel(&mut mine, |p| p.items.is_empty()).await;
    a.delete_note(&id).await.unwrap();
    assert!(matches!(
        a.edit_note(&id, "t", "c").await,
        Err(RoomError::NotFound(_))
    ));
}

#[tokio::test]
async fn notes_not_yet_on_the_panel_are_left_to_the_store() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let bob = peer(&store, "bob", "Bob");
    let earlier = NotesChannel::new(alice.conn.clone());
    let id = earlier
        .create("math-101", &alice.ids.current().unwrap(), "Limits", "epsilon")
        .await
        .unwrap();

    let a = alice.client.enter("math-101", alice.watch()).await.unwrap();
    a.edit_note(&id, "Limits", "epsilon-delta").await.unwrap();
    let b = bob.client.enter("math-101", bob.watch()).await.unwrap();
    assert_eq!(b.edit_note(&id, "x", "y").await, Err(RoomError::Forbidden));
    assert_eq!(b.delete_note(&id).await, Err(RoomError::Forbidden));

    let doc = store.document("notes", &id).unwrap();
    assert_eq!(doc["content"], "epsilon-delta");
    assert!(b.notes().borrow().error.is_none());
}

#[tokio::test]
async fn validation_happens_before_the_store() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let session = alice.client.enter("math-101", alice.watch()).await.unwrap();
    assert!(matches!(session.send("   ").await, Err(RoomError::Validation(_))));
    assert!(matches!(
        session.add_note("", "body").await,
        Err(RoomError::Validation(_))
    ));
    sleep(Duration::from_millis(20)).await;
    assert!(session.chat().borrow().items.is_empty());
    assert!(session.chat().borrow().error.is_none());
}

#[tokio::test]
async fn hidden_peers_are_notified_of_fresh_messages() {
    let store = store();
    let alice = peer(&store, "alice", "Alice");
    let bob = peer(&store, "bob", "Bob");
    let a = alice.client.enter("math-101", alice.watch()).await.unwrap();
    a.send("history").await.unwrap();

    let b = bob.client.enter("math-101", bob.watch()).await.unwrap();
    let mut chat = b.chat();
    wait_panel(&mut chat, |p| p.items.len() == 1).await;
    bob.visibility.set_visible(false);
    alice.visibility.set_visible(false);

    a.send("anyone here?").await.unwrap();
    wait_panel(&mut chat, |p| p.items.len() == 2).await;
    assert!(
        eventually(|| bob.recorder.shown.lock().len() == 1).await,
        "bob should be notified once"
    );
    assert_eq!(
        bob.recorder.shown.lock()[0],
        ("Alice".to_string(), "anyone here?".to_string())
    );

    bob.visibility.set_visible(true);
    a.send("still there?").await.unwrap();
    wait_panel(&mut chat, |p| p.items.len() == 3).await;
    sleep(Duration::from_millis(20)).await;
    assert_eq!(bob.recorder.shown.lock().len(), 1);
    // never for one's own messages
    assert!(alice.recorder.shown.lock().is_empty());
}
