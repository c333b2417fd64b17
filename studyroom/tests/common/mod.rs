#![allow(dead_code)]

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use realtime_store::{Connection, MemoryStore, Rules};
use studyroom::config::default_rooms;
use studyroom::{
    Alerts, Client, Identity, IdentityProvider, LocalIdentity, Notifier, Panel, Permission,
    RoomCatalog, Visibility,
};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration, Instant};

/// Notifier that grants permission and records what it was asked to show.
#[derive(Default)]
pub struct Recorder {
    pub shown: Mutex<Vec<(String, String)>>,
}

impl Notifier for Recorder {
    fn request_permission(&self) -> BoxFuture<'_, anyhow::Result<Permission>> {
        async { Ok(Permission::Granted) }.boxed()
    }

    fn notify(&self, title: &str, body: &str) {
        self.shown.lock().push((title.to_string(), body.to_string()));
    }
}

pub struct Peer {
    pub conn: Arc<Connection>,
    pub client: Client,
    pub ids: LocalIdentity,
    pub recorder: Arc<Recorder>,
    pub visibility: Visibility,
}

impl Peer {
    pub fn uid(&self) -> String {
        self.ids.current().map(|i| i.uid).unwrap_or_default()
    }

    pub fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.ids.watch()
    }
}

pub fn store() -> MemoryStore {
    MemoryStore::with_rules(Rules::new().owner_field("notes", "userId"))
}

pub fn peer(store: &MemoryStore, uid: &str, name: &str) -> Peer {
    let conn = Arc::new(store.connect(Some(uid)));
    let recorder = Arc::new(Recorder::default());
    let visibility = Visibility::default();
    let alerts = Arc::new(Alerts::new(recorder.clone(), visibility.clone(), true));
    let catalog = RoomCatalog::new(default_rooms()).unwrap();
    let client = Client::new(conn.clone(), catalog, alerts, 2_000);
    Peer {
        conn,
        client,
        ids: LocalIdentity::new(Some(Identity::new(uid, name))),
        recorder,
        visibility,
    }
}

/// Wait until the panel satisfies `pred` and return a copy of it.
pub async fn wait_panel<T: Clone>(
    rx: &mut watch::Receiver<Panel<T>>,
    pred: impl FnMut(&Panel<T>) -> bool,
) -> Panel<T> {
    let panel = timeout(Duration::from_secs(1), rx.wait_for(pred))
        .await
        .expect("panel condition in time")
        .expect("panel still open");
    panel.clone()
}

/// Poll `cond` until it holds or a second passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}
