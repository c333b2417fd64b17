use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use serde::Deserialize;

use crate::catalog::RoomCatalog;
use crate::model::Room;
use crate::notify::DEFAULT_WINDOW_MS;

fn room(id: &str, name: &str, description: &str) -> Room {
    Room {
        id: id.into(),
        name: name.into(),
        description: description.into(),
    }
}

/// Rooms offered when the config file lists none.
pub fn default_rooms() -> Vec<Room> {
    vec![
        room("math-101", "Mathematics 101", "Calculus and Algebra"),
        room("physics-201", "Physics 201", "Classical Mechanics"),
        room("cs-301", "Computer Science 301", "Data Structures"),
        room("chemistry-101", "Chemistry 101", "General Chemistry"),
        room("biology-201", "Biology 201", "Molecular Biology"),
    ]
}

/// Command line options for the terminal client.
#[derive(Parser, Debug, Default)]
#[command(name = "studyroom", about = "Multi-room study chat with shared notes")]
pub struct Cli {
    /// Display name to sign in with.
    #[arg(long)]
    pub name: Option<String>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// File the local store is persisted to.
    #[arg(long)]
    pub data_file: Option<PathBuf>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Name to sign in with; prompted for when absent.
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// Whether local notifications are requested at all.
    pub notifications_enabled: bool,
    /// How old a chat message may be and still raise a notification.
    pub recency_window_ms: i64,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Where the store is persisted; `None` keeps it in memory.
    pub data_file: Option<PathBuf>,
    pub catalog: RoomCatalog,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    client: FileClient,
    #[serde(default)]
    notifications: FileNotifications,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    store: FileStore,
    #[serde(default)]
    rooms: Vec<Room>,
}

#[derive(Deserialize, Default)]
struct FileClient {
    display_name: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
struct FileNotifications {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_window")]
    recency_window_ms: i64,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Deserialize)]
struct FileStore {
    #[serde(default = "default_true")]
    persist: bool,
    data_file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_window() -> i64 {
    DEFAULT_WINDOW_MS
}

impl Default for FileNotifications {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            recency_window_ms: default_window(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self {
            persist: default_true(),
            data_file: None,
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("STUDYROOM_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/studyroom.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };

        let mut display_name = file_cfg.client.display_name;
        let mut window = file_cfg.notifications.recency_window_ms;
        let mut logging = file_cfg.logging.enabled;
        let mut data_file = file_cfg.store.data_file;

        // environment overrides
        if let Ok(n) = std::env::var("STUDYROOM_NAME") {
            display_name = Some(n);
        }
        if let Ok(w) = std::env::var("STUDYROOM_NOTIFY_WINDOW_MS") {
            if let Ok(w) = w.parse::<i64>() {
                window = w;
            }
        }
        if let Ok(l) = std::env::var("STUDYROOM_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Ok(f) = std::env::var("STUDYROOM_DATA_FILE") {
            data_file = Some(PathBuf::from(f));
        }

        // CLI overrides
        if let Some(n) = &cli.name {
            display_name = Some(n.clone());
        }
        if let Some(l) = cli.logging {
            logging = l;
        }
        if let Some(f) = &cli.data_file {
            data_file = Some(f.clone());
        }

        if !(1..=60_000).contains(&window) {
            anyhow::bail!("invalid_recency_window");
        }
        let display_name = display_name.filter(|n| !n.trim().is_empty());

        let rooms = if file_cfg.rooms.is_empty() {
            default_rooms()
        } else {
            file_cfg.rooms
        };
        let catalog = RoomCatalog::new(rooms).context("invalid [[rooms]]")?;

        let data_file = if file_cfg.store.persist {
            Some(data_file.unwrap_or_else(default_data_file))
        } else {
            None
        };

        Ok(Self {
            display_name,
            email: file_cfg.client.email,
            notifications_enabled: file_cfg.notifications.enabled,
            recency_window_ms: window,
            logging_enabled: logging,
            data_file,
            catalog,
        })
    }
}

/// Default store file under the platform data directory.
pub fn default_data_file() -> PathBuf {
    ProjectDirs::from("", "", "studyroom")
        .map(|dirs| dirs.data_dir().join("store.json"))
        .unwrap_or_else(|| PathBuf::from("./studyroom_data/store.json"))
}
