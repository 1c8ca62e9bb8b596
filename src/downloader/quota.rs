use serde::{Deserialize, Serialize};
use std::sync::Arc;
use crate::downloader::manifest::ManifestStore;
use crate::downloader::DownloadSettings;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub used_bytes: u64,
    pub max_bytes: u64,
    pub available_bytes: u64,
    pub song_count: usize,
}

/// Usage is recomputed from the manifest on every call; there is no cached counter.
pub struct QuotaAccountant {
    manifest: Arc<ManifestStore>,
}

impl QuotaAccountant {
    pub fn new(manifest: Arc<ManifestStore>) -> Self {
        Self { manifest }
    }

    pub async fn current_usage(&self) -> u64 {
        self.manifest.list().await.iter().map(|entry| entry.total_size).sum()
    }

    pub async fn admit(&self, candidate_size: u64, settings: &DownloadSettings) -> bool {
        self.current_usage().await.saturating_add(candidate_size) <= settings.max_storage_size
    }

    pub async fn available(&self, settings: &DownloadSettings) -> u64 {
        settings.max_storage_size.saturating_sub(self.current_usage().await)
    }

    pub async fn storage_info(&self, settings: &DownloadSettings) -> StorageInfo {
        let entries = self.manifest.list().await;
        let used_bytes: u64 = entries.iter().map(|entry| entry.total_size).sum();

        StorageInfo {
            used_bytes,
            max_bytes: settings.max_storage_size,
            available_bytes: settings.max_storage_size.saturating_sub(used_bytes),
            song_count: entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DownloadableSong;
    use crate::downloader::{ArtifactKind, ArtifactRecord, DownloadedSong};
    use crate::platform::MemoryKeyValueStore;
    use std::path::PathBuf;

    async fn accountant_with(sizes: &[u64]) -> QuotaAccountant {
        let manifest = Arc::new(ManifestStore::new(Arc::new(MemoryKeyValueStore::new())));
        for (i, size) in sizes.iter().enumerate() {
            let mut entry = DownloadedSong::new(&DownloadableSong::new(i.to_string(), "Hymn"));
            entry.set_artifact(ArtifactKind::Audio, ArtifactRecord { local_uri: PathBuf::from("/x"), size: *size });
            manifest.insert(entry).await.unwrap();
        }
        QuotaAccountant::new(manifest)
    }

    fn quota(max: u64) -> DownloadSettings {
        DownloadSettings { max_storage_size: max, ..DownloadSettings::default() }
    }

    #[tokio::test]
    async fn test_usage_sums_manifest() {
        let accountant = accountant_with(&[100, 250]).await;
        assert_eq!(accountant.current_usage().await, 350);
    }

    #[tokio::test]
    async fn test_admission_boundary_is_inclusive() {
        let accountant = accountant_with(&[100]).await;
        assert!(accountant.admit(900, &quota(1000)).await);
        assert!(!accountant.admit(901, &quota(1000)).await);
        assert!(!accountant.admit(u64::MAX, &quota(1000)).await);
    }

    #[tokio::test]
    async fn test_storage_info() {
        let accountant = accountant_with(&[100, 200]).await;
        let info = accountant.storage_info(&quota(250)).await;
        assert_eq!(info, StorageInfo { used_bytes: 300, max_bytes: 250, available_bytes: 0, song_count: 2 });
        assert_eq!(accountant.available(&quota(1000)).await, 700);
    }
}
