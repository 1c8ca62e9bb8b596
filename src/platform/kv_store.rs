use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use crate::errors::{AppError, Result};
use crate::platform::KeyValueStore;

/// Key-value store persisted as a single JSON object on disk.
pub struct JsonFileStore {
    storage_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(storage_path: PathBuf) -> Self {
        Self {
            storage_path,
            lock: Mutex::new(()),
        }
    }

    async fn load_storage(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.storage_path).await {
            Ok(data) if data.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(data) => serde_json::from_str(&data)
                .map_err(|e| AppError::Storage(format!("Failed to parse storage file {:?}: {}", self.storage_path, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(AppError::Storage(format!("Failed to read storage file {:?}: {}", self.storage_path, e))),
        }
    }

    // Written to a sibling temp file and renamed so readers never see a torn file.
    async fn save_storage(&self, storage: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.storage_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_string_pretty(storage)?;
        let tmp_path = self.storage_path.with_extension(format!("tmp-{}", crate::utils::generate_id()));

        tokio::fs::write(&tmp_path, data)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write storage file: {}", e)))?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.storage_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(AppError::Storage(format!("Failed to replace storage file: {}", e)));
        }

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let storage = self.load_storage().await?;
        Ok(storage.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut storage = self.load_storage().await?;
        storage.insert(key.to_string(), value.to_string());
        self.save_storage(&storage).await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut storage = self.load_storage().await?;
        if storage.remove(key).is_some() {
            self.save_storage(&storage).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");

        let store = JsonFileStore::new(path.clone());
        store.set_item("download_settings", "{\"maxStorageSize\":10}").await.unwrap();
        store.set_item("downloaded_songs", "[]").await.unwrap();

        let reopened = JsonFileStore::new(path);
        assert_eq!(
            reopened.get_item("download_settings").await.unwrap().as_deref(),
            Some("{\"maxStorageSize\":10}")
        );
        assert_eq!(reopened.get_item("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_item() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("store.json"));
        store.set_item("k", "v").await.unwrap();
        store.remove_item("k").await.unwrap();
        store.remove_item("k").await.unwrap();
        assert_eq!(store.get_item("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let store = JsonFileStore::new(path);
        assert!(matches!(store.get_item("k").await, Err(AppError::Storage(_))));
        assert!(store.set_item("k", "v").await.is_err());
    }
}
