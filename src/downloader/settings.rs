use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use crate::errors::{AppError, Result};
use crate::platform::KeyValueStore;
use crate::security::InputValidator;

pub const SETTINGS_KEY: &str = "download_settings";
pub const DEFAULT_MAX_STORAGE_SIZE: u64 = 500 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadSettings {
    /// Byte quota across all downloaded songs.
    pub max_storage_size: u64,
    pub auto_download_on_wifi: bool,
    pub download_audio_by_default: bool,
    pub download_notation_by_default: bool,
    pub notify_on_complete: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_storage_size: DEFAULT_MAX_STORAGE_SIZE,
            auto_download_on_wifi: true,
            download_audio_by_default: true,
            download_notation_by_default: true,
            notify_on_complete: true,
        }
    }
}

/// Partial settings; `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub max_storage_size: Option<u64>,
    pub auto_download_on_wifi: Option<bool>,
    pub download_audio_by_default: Option<bool>,
    pub download_notation_by_default: Option<bool>,
    pub notify_on_complete: Option<bool>,
}

impl DownloadSettings {
    pub fn merged(&self, update: &SettingsUpdate) -> Self {
        Self {
            max_storage_size: update.max_storage_size.unwrap_or(self.max_storage_size),
            auto_download_on_wifi: update.auto_download_on_wifi.unwrap_or(self.auto_download_on_wifi),
            download_audio_by_default: update
                .download_audio_by_default
                .unwrap_or(self.download_audio_by_default),
            download_notation_by_default: update
                .download_notation_by_default
                .unwrap_or(self.download_notation_by_default),
            notify_on_complete: update.notify_on_complete.unwrap_or(self.notify_on_complete),
        }
    }
}

/// Persisted singleton `DownloadSettings`.
pub struct SettingsStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    /// Stored values merged over defaults. Defaults are persisted on first access.
    pub async fn get(&self) -> DownloadSettings {
        match self.kv.get_item(SETTINGS_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<DownloadSettings>(&raw) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Stored download settings are unreadable, using defaults: {}", e);
                    DownloadSettings::default()
                }
            },
            Ok(None) => {
                let defaults = DownloadSettings::default();
                if let Err(e) = self.persist(&defaults).await {
                    log::warn!("Failed to persist default download settings: {}", e);
                }
                defaults
            }
            Err(e) => {
                log::error!("Failed to read download settings: {}", e);
                DownloadSettings::default()
            }
        }
    }

    pub async fn update(&self, update: &SettingsUpdate) -> Result<DownloadSettings> {
        InputValidator::new().validate_settings_update(update)?;

        let _guard = self.write_lock.lock().await;
        let merged = self.get().await.merged(update);
        self.persist(&merged).await?;
        log::info!("Download settings updated: {:?}", merged);
        Ok(merged)
    }

    async fn persist(&self, settings: &DownloadSettings) -> Result<()> {
        let raw = serde_json::to_string(settings)?;
        self.kv
            .set_item(SETTINGS_KEY, &raw)
            .await
            .map_err(|e| AppError::PersistenceFailed(format!("Failed to save download settings: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryKeyValueStore;

    #[tokio::test]
    async fn test_first_access_persists_defaults() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = SettingsStore::new(kv.clone());

        assert_eq!(store.get().await, DownloadSettings::default());
        assert!(kv.get_item(SETTINGS_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_partial_stored_object_merges_with_defaults() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set_item(SETTINGS_KEY, r#"{"maxStorageSize":1000,"notifyOnComplete":false}"#).await.unwrap();
        let store = SettingsStore::new(kv);

        let settings = store.get().await;
        assert_eq!(settings.max_storage_size, 1000);
        assert!(!settings.notify_on_complete);
        assert!(settings.download_audio_by_default);
    }

    #[tokio::test]
    async fn test_update_shallow_merges_and_persists() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = SettingsStore::new(kv.clone());

        let updated = store
            .update(&SettingsUpdate { download_audio_by_default: Some(false), ..SettingsUpdate::default() })
            .await
            .unwrap();
        assert!(!updated.download_audio_by_default);
        assert_eq!(updated.max_storage_size, DEFAULT_MAX_STORAGE_SIZE);

        let reloaded = SettingsStore::new(kv).get().await;
        assert_eq!(reloaded, updated);
    }

    #[tokio::test]
    async fn test_update_rejects_zero_quota() {
        let store = SettingsStore::new(Arc::new(MemoryKeyValueStore::new()));
        let result = store
            .update(&SettingsUpdate { max_storage_size: Some(0), ..SettingsUpdate::default() })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(store.get().await.max_storage_size, DEFAULT_MAX_STORAGE_SIZE);
    }

    #[tokio::test]
    async fn test_update_write_failure_surfaces() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.fail_writes_for(SETTINGS_KEY);
        let store = SettingsStore::new(kv);

        let result = store
            .update(&SettingsUpdate { notify_on_complete: Some(false), ..SettingsUpdate::default() })
            .await;
        assert!(matches!(result, Err(AppError::PersistenceFailed(_))));
    }

    #[tokio::test]
    async fn test_corrupt_settings_fall_back_to_defaults() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set_item(SETTINGS_KEY, "not json").await.unwrap();
        assert_eq!(SettingsStore::new(kv).get().await, DownloadSettings::default());
    }
}
