use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};

use crate::{documents::Documents, tree::Tree};

/// Durable part of the store as written to disk.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Dump {
    #[serde(default)]
    pub tree: Tree,
    #[serde(default)]
    pub documents: Documents,
}

/// JSON file backing for a [`crate::MemoryStore`].
pub struct Persistence {
    file: PathBuf,
    written: Mutex<u64>,
}

impl Persistence {
    /// Open the file, creating its directory. A missing file is an empty
    /// store; an unreadable one is an error.
    pub async fn load(file: PathBuf) -> Result<(Self, Dump)> {
        if let Some(dir) = file.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let dump = match fs::read(&file).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("invalid store file {}", file.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Dump::default(),
            Err(err) => return Err(err).context("reading store file"),
        };
        Ok((
            Self {
                file,
                written: Mutex::new(0),
            },
            dump,
        ))
    }

    /// Write `bytes` unless a newer generation already reached the disk.
    pub async fn write(&self, generation: u64, bytes: Vec<u8>) -> Result<()> {
        let mut written = self.written.lock().await;
        if generation <= *written {
            return Ok(());
        }
        fs::write(&self.file, bytes)
            .await
            .with_context(|| format!("writing {}", self.file.display()))?;
        *written = generation;
        Ok(())
    }

    pub fn file(&self) -> &std::path::Path {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_generation_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/store.json");
        let (p, dump) = Persistence::load(path.clone()).await.unwrap();
        assert!(dump.tree.children("x").is_empty());
        p.write(2, b"{\"tree\":{}}".to_vec()).await.unwrap();
        p.write(1, b"garbage".to_vec()).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\"tree\":{}}");
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Persistence::load(path).await.is_err());
    }
}
