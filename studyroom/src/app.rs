use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use realtime_store::{Connection, MemoryStore, Rules};
use serde_json::json;
use store_api::NOTES_COLLECTION;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::info;

use crate::config::Config;
use crate::console::{self, Command};
use crate::error::{RoomError, RoomResult};
use crate::identity::{IdentityProvider, LocalIdentity};
use crate::model::{ChatMessage, Identity};
use crate::notify::{Alerts, Notifier, Permission, Visibility};
use crate::session::{Client, RoomSession};

/// Prints notifications to the terminal.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn request_permission(&self) -> BoxFuture<'_, Result<Permission>> {
        async { Ok(Permission::Granted) }.boxed()
    }

    fn notify(&self, title: &str, body: &str) {
        println!("\x07[notification] {title}: {body}");
    }
}

fn clock(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .map(|t| format!("{:02}:{:02}", t.hour(), t.minute()))
        .unwrap_or_else(|_| "--:--".into())
}

fn print_message(m: &ChatMessage) {
    println!("[{}] {}: {}", clock(m.sent_at), m.author_name, m.text);
}

/// Print chat lines as they arrive, and the chat error banner once.
fn spawn_chat_printer(session: &RoomSession) -> JoinHandle<()> {
    let mut rx = session.chat();
    tokio::spawn(async move {
        let mut printed = HashSet::new();
        let mut banner = false;
        loop {
            {
                let panel = rx.borrow_and_update();
                for m in panel.items.iter().filter(|m| !printed.contains(&m.id)) {
                    print_message(m);
                }
                printed.extend(panel.items.iter().map(|m| m.id.clone()));
                if let (Some(err), false) = (&panel.error, banner) {
                    println!("! chat unavailable: {err}");
                    banner = true;
                }
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
}

struct SignedIn {
    client: Client,
    /// Keeps the store link open; dropping it fires disconnect cleanup.
    _conn: Arc<Connection>,
}

struct App {
    cfg: Config,
    store: MemoryStore,
    alerts: Arc<Alerts>,
    identity: LocalIdentity,
    push_tx: UnboundedSender<serde_json::Value>,
    signed_in: Option<SignedIn>,
    session: Option<(RoomSession, JoinHandle<()>)>,
}

impl App {
    fn sign_in(&mut self, identity: Identity) {
        let conn = Arc::new(self.store.connect(Some(&identity.uid)));
        let client = Client::new(
            conn.clone(),
            self.cfg.catalog.clone(),
            self.alerts.clone(),
            self.cfg.recency_window_ms,
        );
        println!("signed in as {}", identity.label());
        self.identity.sign_in(identity);
        self.signed_in = Some(SignedIn { client, _conn: conn });
    }

    async fn leave_room(&mut self) {
        if let Some((session, printer)) = self.session.take() {
            session.leave().await;
            printer.abort();
            println!("left {}", session.room().name);
        }
    }

    async fn sign_out(&mut self) {
        self.leave_room().await;
        self.identity.logout();
        self.signed_in = None;
        println!("signed out; /login <name> to continue");
    }

    async fn show_rooms(&self) {
        let Some(s) = &self.signed_in else {
            for room in self.cfg.catalog.iter() {
                println!("{:<15} {:<22} {}", room.id, room.name, room.description);
            }
            return;
        };
        let lobby = s.client.lobby();
        let mut panel = lobby.panel();
        let _ = timeout(
            Duration::from_secs(1),
            panel.wait_for(|p| p.loaded || p.error.is_some()),
        )
        .await;
        let snapshot = lobby.snapshot();
        lobby.close();
        if let Some(err) = snapshot.error {
            println!("! presence unavailable: {err}");
        }
        for o in snapshot.items {
            println!(
                "{:<15} {:<22} {:>3} online  {}",
                o.room.id, o.room.name, o.online, o.room.description
            );
        }
    }

    async fn join(&mut self, room_id: &str) {
        let Some(s) = &self.signed_in else {
            println!("sign in first: /login <name>");
            return;
        };
        let client = s.client.clone();
        if !client.catalog().contains(room_id) {
            println!("{}", RoomError::UnknownRoom(room_id.to_string()));
            return;
        }
        self.leave_room().await;
        match client.enter(room_id, self.identity.watch()).await {
            Ok(session) => {
                println!("joined {} ({})", session.room().name, session.room().description);
                let printer = spawn_chat_printer(&session);
                self.session = Some((session, printer));
            }
            Err(err) => println!("{err}"),
        }
    }

    fn active(&self) -> Option<&RoomSession> {
        match &self.session {
            Some((s, _)) if s.is_active() => Some(s),
            _ => {
                println!("not in a room: /join <room>");
                None
            }
        }
    }

    fn report(res: RoomResult<()>) {
        if let Err(err) = res {
            println!("! {err}");
        }
    }

    /// Returns false when the client should exit.
    async fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Empty => {}
            Command::Help => println!("{}", console::HELP),
            Command::Invalid(hint) => println!("{hint}"),
            Command::Rooms => self.show_rooms().await,
            Command::Join(room) => self.join(&room).await,
            Command::Leave => self.leave_room().await,
            Command::Who => {
                if let Some(s) = self.active() {
                    let panel = s.presence().borrow().clone();
                    if let Some(err) = &panel.error {
                        println!("! presence unavailable: {err}");
                    }
                    println!("{} online in {}", panel.items.len(), s.room().name);
                    for e in &panel.items {
                        println!("  {}", e.display_name);
                    }
                }
            }
            Command::Notes => {
                if let Some(s) = self.active() {
                    let panel = s.notes().borrow().clone();
                    if let Some(err) = &panel.error {
                        println!("! notes unavailable: {err}");
                    }
                    if panel.items.is_empty() {
                        println!("no notes yet");
                    }
                    for n in &panel.items {
                        let mine = if n.author_id == s.identity().uid { "*" } else { " " };
                        println!("{mine} {} [{}] {}\n    {}", n.id, n.author_name, n.title, n.content);
                    }
                }
            }
            Command::NoteAdd { title, content } => {
                if let Some(s) = self.active() {
                    Self::report(s.add_note(&title, &content).await.map(|_| ()));
                }
            }
            Command::NoteEdit { id, title, content } => {
                if let Some(s) = self.active() {
                    Self::report(s.edit_note(&id, &title, &content).await);
                }
            }
            Command::NoteRm(id) => {
                if let Some(s) = self.active() {
                    Self::report(s.delete_note(&id).await);
                }
            }
            Command::Say(text) => {
                if let Some(s) = self.active() {
                    Self::report(s.send(&text).await.map(|_| ()));
                }
            }
            Command::Hide => self.alerts.visibility().set_visible(false),
            Command::Show => self.alerts.visibility().set_visible(true),
            Command::Push { title, body } => {
                let _ = self.push_tx.send(json!({ "title": title, "body": body }));
            }
            Command::Login(name) => {
                if self.identity.current().is_some() {
                    self.sign_out().await;
                }
                self.sign_in(LocalIdentity::for_name(&name, None));
            }
            Command::Logout => self.sign_out().await,
            Command::Quit => return false,
        }
        true
    }
}

/// Run the terminal client until `/quit` or end of input.
pub async fn run(cfg: Config) -> Result<()> {
    let rules = Rules::new().owner_field(NOTES_COLLECTION, "userId");
    let store = match &cfg.data_file {
        Some(file) => MemoryStore::open(file, rules)
            .await
            .with_context(|| format!("failed to open store {}", file.display()))?,
        None => MemoryStore::with_rules(rules),
    };

    let alerts = Arc::new(Alerts::new(
        Arc::new(ConsoleNotifier),
        Visibility::default(),
        cfg.notifications_enabled,
    ));
    let (push_tx, push_rx) = unbounded_channel();
    let foreground = alerts.install_foreground_listener(push_rx);

    let mut app = App {
        store,
        alerts,
        identity: LocalIdentity::new(None),
        push_tx,
        signed_in: None,
        session: None,
        cfg,
    };
    if let Some(name) = app.cfg.display_name.clone() {
        let email = app.cfg.email.clone();
        app.sign_in(LocalIdentity::for_name(&name, email));
    } else {
        println!("/login <name> to sign in");
    }
    println!("type /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !app.handle(console::parse(&line)).await {
            break;
        }
    }

    app.leave_room().await;
    app.signed_in = None;
    foreground.abort();
    info!("bye");
    Ok(())
}
