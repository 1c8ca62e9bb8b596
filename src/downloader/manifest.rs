use std::sync::Arc;
use tokio::sync::Mutex;
use crate::downloader::DownloadedSong;
use crate::errors::{AppError, Result};
use crate::platform::KeyValueStore;

pub const MANIFEST_KEY: &str = "downloaded_songs";

/// Durable list of completed downloads, keyed by song id.
///
/// Reads fail open (an unreadable manifest lists as empty). Mutations hold
/// `write_lock` across their read-modify-write and re-read strictly, so a
/// corrupt manifest is never silently replaced and concurrent completions
/// cannot drop each other's entries.
pub struct ManifestStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl ManifestStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn list(&self) -> Vec<DownloadedSong> {
        match self.load().await {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Failed to read download manifest: {}", e);
                Vec::new()
            }
        }
    }

    /// Like `list`, but an unreadable manifest is an error instead of an empty list.
    pub async fn try_list(&self) -> Result<Vec<DownloadedSong>> {
        self.load().await
    }

    pub async fn get(&self, id: &str) -> Option<DownloadedSong> {
        self.list().await.into_iter().find(|entry| entry.id == id)
    }

    pub async fn is_present(&self, id: &str) -> bool {
        self.get(id).await.is_some()
    }

    /// Appends `entry`; an entry with the same id is rejected.
    pub async fn insert(&self, entry: DownloadedSong) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;

        if entries.iter().any(|existing| existing.id == entry.id) {
            return Err(AppError::DuplicateEntry(entry.id));
        }

        entries.push(entry);
        self.save(&entries).await
    }

    /// Returns whether an entry was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;

        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return Ok(false);
        }

        self.save(&entries).await?;
        Ok(true)
    }

    pub async fn replace_all(&self, entries: Vec<DownloadedSong>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.save(&entries).await
    }

    async fn load(&self) -> Result<Vec<DownloadedSong>> {
        match self.kv.get_item(MANIFEST_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, entries: &[DownloadedSong]) -> Result<()> {
        let raw = serde_json::to_string(entries)?;
        self.kv
            .set_item(MANIFEST_KEY, &raw)
            .await
            .map_err(|e| AppError::PersistenceFailed(format!("Failed to save download manifest: {}", e)))
    }
}
