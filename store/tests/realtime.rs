use realtime_store::{MemoryStore, Rules};
use serde_json::{json, Value};
use store_api::{Delivery, DocumentStore, EventLogStore, Feed, Keyed, StoreError};
use tokio::time::{timeout, Duration};

async fn next(feed: &mut Feed) -> Delivery {
    timeout(Duration::from_millis(500), feed.recv())
        .await
        .expect("delivery in time")
        .expect("feed open")
}

async fn next_snapshot(feed: &mut Feed) -> Vec<Keyed<Value>> {
    match next(feed).await {
        Delivery::Snapshot(items) => items,
        Delivery::Error(err) => panic!("unexpected error {err}"),
    }
}

#[tokio::test]
async fn ephemeral_entry_vanishes_when_owner_drops() {
    let store = MemoryStore::new();
    let alice = store.connect(Some("alice"));
    let bob = store.connect(Some("bob"));
    let mut feed = bob.listen("onlineUsers");
    assert!(next_snapshot(&mut feed).await.is_empty());

    alice
        .set_ephemeral(
            "onlineUsers/alice",
            json!({"displayName": "Alice", "roomId": "math-101", "lastSeen": {".sv": "timestamp"}}),
        )
        .await
        .unwrap();
    let snap = next_snapshot(&mut feed).await;
    assert_eq!(snap.len(), 1);
    assert!(snap[0].value["lastSeen"].is_i64());

    alice.disconnect();
    assert!(next_snapshot(&mut feed).await.is_empty());
    assert!(store.read("onlineUsers/alice").is_none());
    assert_eq!(
        alice.remove("onlineUsers/alice").await,
        Err(StoreError::Disconnected)
    );
}

#[tokio::test]
async fn dropping_connection_fires_hooks() {
    let store = MemoryStore::new();
    {
        let conn = store.connect(Some("u"));
        conn.set_ephemeral("onlineUsers/u", json!({"roomId": "r"}))
            .await
            .unwrap();
        assert!(store.read("onlineUsers/u").is_some());
    }
    assert!(store.read("onlineUsers/u").is_none());
}

#[tokio::test]
async fn pushes_are_delivered_in_key_order() {
    let store = MemoryStore::new();
    let conn = store.connect(None);
    let mut feed = conn.listen("rooms/r/messages");
    next_snapshot(&mut feed).await;
    let mut keys = Vec::new();
    for i in 0..5 {
        keys.push(conn.push("rooms/r/messages", json!({"n": i})).await.unwrap());
    }
    let mut last = Vec::new();
    for _ in 0..5 {
        last = next_snapshot(&mut feed).await;
    }
    let delivered: Vec<_> = last.iter().map(|k| k.id.clone()).collect();
    assert_eq!(delivered, keys);
}

#[tokio::test]
async fn removing_absent_path_is_quiet() {
    let store = MemoryStore::new();
    let conn = store.connect(None);
    let mut feed = conn.listen("onlineUsers");
    next_snapshot(&mut feed).await;
    conn.remove("onlineUsers/ghost").await.unwrap();
    conn.remove("onlineUsers/ghost").await.unwrap();
    assert!(timeout(Duration::from_millis(50), feed.recv()).await.is_err());
}

#[tokio::test]
async fn documents_update_delete_and_query() {
    let store = MemoryStore::new();
    let conn = store.connect(Some("u1"));
    let mut r1 = conn.listen_query("notes", "roomId", &json!("r1"));
    let mut r2 = conn.listen_query("notes", "roomId", &json!("r2"));
    next_snapshot(&mut r1).await;
    next_snapshot(&mut r2).await;

    let id = conn
        .add("notes", json!({"roomId": "r1", "title": "T", "createdAt": {".sv": "timestamp"}}))
        .await
        .unwrap();
    let snap = next_snapshot(&mut r1).await;
    assert_eq!(snap[0].id, id);
    assert!(snap[0].value["createdAt"].is_i64());
    // untouched query stays silent
    assert!(timeout(Duration::from_millis(50), r2.recv()).await.is_err());

    conn.update("notes", &id, json!({"title": "T2"})).await.unwrap();
    assert_eq!(next_snapshot(&mut r1).await[0].value["title"], "T2");

    conn.delete("notes", &id).await.unwrap();
    assert!(next_snapshot(&mut r1).await.is_empty());
    conn.delete("notes", &id).await.unwrap();
    assert!(matches!(
        conn.update("notes", &id, json!({"title": "x"})).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn owner_rule_blocks_other_users() {
    let store = MemoryStore::with_rules(Rules::new().owner_field("notes", "userId"));
    let owner = store.connect(Some("u1"));
    let other = store.connect(Some("u2"));
    let id = owner
        .add("notes", json!({"roomId": "r", "userId": "u1"}))
        .await
        .unwrap();
    assert!(matches!(
        other.update("notes", &id, json!({"title": "x"})).await,
        Err(StoreError::PermissionDenied(_))
    ));
    assert!(matches!(
        other.delete("notes", &id).await,
        Err(StoreError::PermissionDenied(_))
    ));
    owner.delete("notes", &id).await.unwrap();
}

#[tokio::test]
async fn deny_fails_live_and_new_listeners() {
    let store = MemoryStore::new();
    let conn = store.connect(None);
    let mut feed = conn.listen("rooms/r/messages");
    next_snapshot(&mut feed).await;
    store.deny("rooms/r");
    assert!(matches!(
        next(&mut feed).await,
        Delivery::Error(StoreError::PermissionDenied(_))
    ));
    assert!(feed.recv().await.is_none());

    let mut again = conn.listen("rooms/r/messages");
    assert!(matches!(next(&mut again).await, Delivery::Error(_)));
    assert!(conn.push("rooms/r/messages", json!({})).await.is_err());
    assert!(conn.push("rooms/other/messages", json!({})).await.is_ok());
}

#[tokio::test]
async fn unlisten_stops_deliveries() {
    let store = MemoryStore::new();
    let conn = store.connect(None);
    let mut feed = conn.listen("rooms/r/messages");
    next_snapshot(&mut feed).await;
    conn.unlisten(feed.id);
    conn.unlisten(feed.id);
    assert_eq!(store.listener_count(), 0);
    conn.push("rooms/r/messages", json!({})).await.unwrap();
    assert!(feed.recv().await.is_none());
}

#[tokio::test]
async fn persisted_store_keeps_durable_data_only() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("store.json");
    {
        let store = MemoryStore::open(&file, Rules::new()).await.unwrap();
        let conn = store.connect(Some("u"));
        conn.push("rooms/r/messages", json!({"text": "hi"}))
            .await
            .unwrap();
        conn.set_ephemeral("onlineUsers/u", json!({"roomId": "r"}))
            .await
            .unwrap();
        conn.add("notes", json!({"roomId": "r", "title": "T"}))
            .await
            .unwrap();
    }
    let store = MemoryStore::open(&file, Rules::new()).await.unwrap();
    let conn = store.connect(None);
    let mut chat = conn.listen("rooms/r/messages");
    assert_eq!(next_snapshot(&mut chat).await.len(), 1);
    let mut presence = conn.listen("onlineUsers");
    assert!(next_snapshot(&mut presence).await.is_empty());
    let mut notes = conn.listen_query("notes", "roomId", &json!("r"));
    assert_eq!(next_snapshot(&mut notes).await.len(), 1);
}
