//! In-memory collaborators for embedding the manager without a filesystem,
//! and for exercising its failure paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use crate::errors::{AppError, Result};
use crate::platform::{FileStat, FileStore, KeyValueStore, TransferProgressFn, TransferReport};

#[derive(Default)]
pub struct MemoryKeyValueStore {
    items: Mutex<HashMap<String, String>>,
    failing_keys: Mutex<HashSet<String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write to `key` fail.
    pub fn fail_writes_for(&self, key: &str) {
        lock(&self.failing_keys).insert(key.to_string());
    }

    pub fn restore_writes(&self) {
        lock(&self.failing_keys).clear();
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if lock(&self.failing_keys).contains(key) {
            return Err(AppError::Storage(format!("write to {} rejected", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.items).get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable(key)?;
        lock(&self.items).insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        lock(&self.items).remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Response {
    Body(Vec<u8>),
    /// Writes `partial`, then fails with `message`.
    Fail { partial: Vec<u8>, message: String },
    /// Writes `partial`, then never completes.
    Stall { partial: Vec<u8> },
}

/// File store whose "network" is a table of scripted responses keyed by URL.
#[derive(Default)]
pub struct MemoryFileStore {
    responses: Mutex<HashMap<String, Response>>,
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    directories: Mutex<HashSet<PathBuf>>,
    undeletable: Mutex<HashSet<PathBuf>>,
    transfers: AtomicUsize,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        lock(&self.responses).insert(url.to_string(), Response::Body(body.into()));
    }

    pub fn fail(&self, url: &str, partial: impl Into<Vec<u8>>, message: &str) {
        lock(&self.responses).insert(
            url.to_string(),
            Response::Fail { partial: partial.into(), message: message.to_string() },
        );
    }

    pub fn stall(&self, url: &str, partial: impl Into<Vec<u8>>) {
        lock(&self.responses).insert(url.to_string(), Response::Stall { partial: partial.into() });
    }

    /// Makes deletion of `path` fail with an I/O error.
    pub fn fail_delete(&self, path: &Path) {
        lock(&self.undeletable).insert(path.to_path_buf());
    }

    pub fn put_file(&self, path: &Path, contents: impl Into<Vec<u8>>) {
        lock(&self.files).insert(path.to_path_buf(), contents.into());
    }

    pub fn file(&self, path: &Path) -> Option<Vec<u8>> {
        lock(&self.files).get(path).cloned()
    }

    pub fn file_paths(&self) -> Vec<PathBuf> {
        lock(&self.files).keys().cloned().collect()
    }

    pub fn has_directory(&self, path: &Path) -> bool {
        lock(&self.directories).contains(path)
    }

    /// Number of `download` calls made so far.
    pub fn transfer_count(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }

    fn write_chunks(&self, dest: &Path, body: &[u8], total: Option<u64>, on_progress: Option<&TransferProgressFn<'_>>) {
        let chunk_size = (body.len() / 4).max(1);
        let mut written = Vec::with_capacity(body.len());

        for chunk in body.chunks(chunk_size) {
            written.extend_from_slice(chunk);
            self.put_file(dest, written.clone());
            if let Some(callback) = on_progress {
                callback(written.len() as u64, total);
            }
        }
        if body.is_empty() {
            self.put_file(dest, Vec::new());
        }
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn ensure_directory(&self, path: &Path) -> Result<()> {
        lock(&self.directories).insert(path.to_path_buf());
        Ok(())
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: Option<&TransferProgressFn<'_>>,
    ) -> Result<TransferReport> {
        self.transfers.fetch_add(1, Ordering::SeqCst);
        let response = lock(&self.responses).get(url).cloned();

        match response {
            Some(Response::Body(body)) => {
                self.write_chunks(dest, &body, Some(body.len() as u64), on_progress);
                Ok(TransferReport { bytes_written: body.len() as u64 })
            }
            Some(Response::Fail { partial, message }) => {
                self.write_chunks(dest, &partial, None, on_progress);
                Err(AppError::TransferFailed(message))
            }
            Some(Response::Stall { partial }) => {
                self.write_chunks(dest, &partial, None, on_progress);
                std::future::pending::<Result<TransferReport>>().await
            }
            None => Err(AppError::TransferFailed(format!("HTTP error: 404 Not Found ({})", url))),
        }
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        Ok(lock(&self.files)
            .get(path)
            .map(|contents| FileStat { exists: true, size: contents.len() as u64 })
            .unwrap_or_default())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        if lock(&self.undeletable).contains(path) {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot delete {:?}", path),
            )));
        }
        lock(&self.files).remove(path);
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        Ok(lock(&self.files)
            .keys()
            .filter(|file| file.parent() == Some(path))
            .cloned()
            .collect())
    }
}

// A poisoned lock only means another test thread panicked; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[tokio::test]
    async fn test_served_body_is_written_in_chunks() {
        let store = MemoryFileStore::new();
        store.serve("https://hymns.test/1.mp3", vec![7u8; 100]);

        let calls = AtomicU64::new(0);
        let callback = |_: u64, total: Option<u64>| {
            assert_eq!(total, Some(100));
            calls.fetch_add(1, Ordering::SeqCst);
        };
        let dest = Path::new("/root/audio/1_audio.mp3");
        let report = store.download("https://hymns.test/1.mp3", dest, Some(&callback)).await.unwrap();

        assert_eq!(report.bytes_written, 100);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(store.stat(dest).await.unwrap().size, 100);
    }

    #[tokio::test]
    async fn test_failure_leaves_partial_file() {
        let store = MemoryFileStore::new();
        store.fail("https://hymns.test/2.mp3", b"abc".to_vec(), "connection reset");
        let dest = Path::new("/root/audio/2_audio.mp3");

        let result = store.download("https://hymns.test/2.mp3", dest, None).await;
        assert!(matches!(result, Err(AppError::TransferFailed(msg)) if msg == "connection reset"));
        assert_eq!(store.file(dest), Some(b"abc".to_vec()));
    }

    #[tokio::test]
    async fn test_kv_write_failure_is_key_scoped() {
        let store = MemoryKeyValueStore::new();
        store.fail_writes_for("downloaded_songs");

        assert!(store.set_item("downloaded_songs", "[]").await.is_err());
        store.set_item("download_settings", "{}").await.unwrap();

        store.restore_writes();
        store.set_item("downloaded_songs", "[]").await.unwrap();
        assert_eq!(store.get_item("downloaded_songs").await.unwrap().as_deref(), Some("[]"));
    }
}
