use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use crate::api::DownloadableSong;
use crate::downloader::layout::{partial_path, StorageLayout};
use crate::downloader::manifest::ManifestStore;
use crate::downloader::progress::{ProgressCallback, ProgressReporter};
use crate::downloader::quota::{QuotaAccountant, StorageInfo};
use crate::downloader::settings::SettingsStore;
use crate::downloader::{
    ArtifactKind, ArtifactRecord, DownloadOptions, DownloadProgress, DownloadSettings, DownloadedSong,
    SettingsUpdate,
};
use crate::errors::{AppError, Result};
use crate::platform::{
    ConnectionKind, FileStore, KeyValueStore, NetworkStatus, Notification, NotificationSink, TransferProgressFn,
};
use crate::security::InputValidator;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Collaborators and host settings a `DownloadManager` is built from.
pub struct DownloadManagerDeps {
    pub kv: Arc<dyn KeyValueStore>,
    pub files: Arc<dyn FileStore>,
    pub network: Arc<dyn NetworkStatus>,
    pub notifier: Option<Arc<dyn NotificationSink>>,
    pub download_root: PathBuf,
    pub transfer_timeout: Duration,
}

impl DownloadManagerDeps {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        files: Arc<dyn FileStore>,
        network: Arc<dyn NetworkStatus>,
        download_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kv,
            files,
            network,
            notifier: None,
            download_root: download_root.into(),
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }
}

/// Offline download orchestrator: admission, sequential artifact transfers,
/// rollback on failure and the manifest commit.
pub struct DownloadManager {
    manifest: Arc<ManifestStore>,
    settings: SettingsStore,
    quota: QuotaAccountant,
    files: Arc<dyn FileStore>,
    network: Arc<dyn NetworkStatus>,
    notifier: Option<Arc<dyn NotificationSink>>,
    layout: StorageLayout,
    transfer_timeout: Duration,
    validator: InputValidator,
    events: broadcast::Sender<DownloadProgress>,
    active: Mutex<HashMap<String, CancellationToken>>,
    // Held from the post-transfer quota check through the manifest insert.
    commit_lock: tokio::sync::Mutex<()>,
}

/// Registration of an in-flight download; unregisters on drop.
struct ActiveDownload<'a> {
    registry: &'a Mutex<HashMap<String, CancellationToken>>,
    song_id: String,
    token: CancellationToken,
}

impl Drop for ActiveDownload<'_> {
    fn drop(&mut self) {
        lock(self.registry).remove(&self.song_id);
    }
}

impl DownloadManager {
    pub fn new(deps: DownloadManagerDeps) -> Self {
        let manifest = Arc::new(ManifestStore::new(deps.kv.clone()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        log::info!("📁 Download manager rooted at {:?}", deps.download_root);

        Self {
            quota: QuotaAccountant::new(manifest.clone()),
            settings: SettingsStore::new(deps.kv),
            manifest,
            files: deps.files,
            network: deps.network,
            notifier: deps.notifier,
            layout: StorageLayout::new(deps.download_root),
            transfer_timeout: deps.transfer_timeout,
            validator: InputValidator::new(),
            events,
            active: Mutex::new(HashMap::new()),
            commit_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Downloads the requested artifacts of `song` and records it in the manifest.
    ///
    /// Either every requested artifact is stored and the song is committed, or
    /// nothing is: files written by a failed attempt are removed and the
    /// manifest is left untouched. Every call ends with exactly one terminal
    /// progress event.
    pub async fn download_song(
        &self,
        song: &DownloadableSong,
        options: DownloadOptions,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DownloadedSong> {
        let reporter = ProgressReporter::new(song.id.clone(), on_progress, self.events.clone());

        match self.run_download(song, options, &reporter).await {
            Ok(entry) => {
                reporter.completed();
                Ok(entry)
            }
            Err(e) => {
                if e.is_cancelled() {
                    log::info!("🛑 Download of song {} cancelled", song.id);
                } else {
                    log::error!("❌ Download of song {} failed: {}", song.id, e);
                }
                reporter.failed(&e);
                Err(e)
            }
        }
    }

    async fn run_download(
        &self,
        song: &DownloadableSong,
        options: DownloadOptions,
        reporter: &ProgressReporter,
    ) -> Result<DownloadedSong> {
        self.validator.validate_song(song)?;

        if !self.network.is_connected().await {
            return Err(AppError::Offline);
        }

        if let Some(existing) = self.manifest.get(&song.id).await {
            log::debug!("Song {} already downloaded", song.id);
            return Ok(existing);
        }

        let active = self.register(&song.id)?;

        // A concurrent attempt may have committed between the lookup and the registration.
        if let Some(existing) = self.manifest.get(&song.id).await {
            return Ok(existing);
        }

        let settings = self.settings.get().await;
        let candidate = song.candidate_size(&options);
        if !self.quota.admit(candidate, &settings).await {
            return Err(AppError::QuotaExceeded {
                required: candidate,
                available: self.quota.available(&settings).await,
            });
        }

        log::info!("⬇️ Downloading song {} ({})", song.id, song.title);
        reporter.pending();

        let mut written = Vec::new();
        match self.transfer_and_commit(song, &options, reporter, &active.token, &mut written).await {
            Ok(entry) => {
                log::info!("✅ Song {} stored offline ({} bytes)", entry.id, entry.total_size);
                if options.show_notification {
                    self.notify_completed(&entry).await;
                }
                Ok(entry)
            }
            Err(e) => {
                self.rollback(&song.id, &written).await;
                Err(e)
            }
        }
    }

    async fn transfer_and_commit(
        &self,
        song: &DownloadableSong,
        options: &DownloadOptions,
        reporter: &ProgressReporter,
        token: &CancellationToken,
        written: &mut Vec<PathBuf>,
    ) -> Result<DownloadedSong> {
        let plan = song.transfer_plan(options);
        let total = plan.len();
        let mut entry = DownloadedSong::new(song);

        for (index, (kind, url)) in plan.iter().enumerate() {
            if token.is_cancelled() {
                return Err(AppError::Cancelled(song.id.clone()));
            }

            self.files
                .ensure_directory(&self.layout.dir_for(*kind))
                .await
                .map_err(as_transfer_failure)?;
            let dest = self.layout.path_for(&song.id, *kind, url);
            written.push(dest.clone());

            reporter.artifact_started(index, total, *kind);
            let size = self.transfer_artifact(&song.id, *kind, url, &dest, (index, total), reporter, token).await?;
            entry.set_artifact(*kind, ArtifactRecord { local_uri: dest, size });
            reporter.artifact_finished(index, total, *kind);
        }

        let _commit = self.commit_lock.lock().await;
        if token.is_cancelled() {
            return Err(AppError::Cancelled(song.id.clone()));
        }

        // Declared sizes are advisory; admit again with what actually landed on disk.
        let settings = self.settings.get().await;
        if !self.quota.admit(entry.total_size, &settings).await {
            return Err(AppError::QuotaExceeded {
                required: entry.total_size,
                available: self.quota.available(&settings).await,
            });
        }

        entry.download_date = Utc::now();
        self.manifest.insert(entry.clone()).await.map_err(|e| match e {
            AppError::PersistenceFailed(_) => e,
            other => AppError::PersistenceFailed(other.to_string()),
        })?;

        Ok(entry)
    }

    /// Transfers one artifact and returns its measured size.
    #[allow(clippy::too_many_arguments)]
    async fn transfer_artifact(
        &self,
        song_id: &str,
        kind: ArtifactKind,
        url: &str,
        dest: &Path,
        (index, total): (usize, usize),
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<u64> {
        log::debug!("🌐 Fetching {} for song {} from {}", kind, song_id, url);

        let on_bytes = |bytes: u64, expected: Option<u64>| {
            if let Some(expected) = expected.filter(|expected| *expected > 0) {
                reporter.artifact_progress(index, total, kind, bytes as f32 / expected as f32);
            }
        };
        let callback: Option<&TransferProgressFn<'_>> =
            if kind.reports_fractional_progress() { Some(&on_bytes) } else { None };

        let transfer = tokio::time::timeout(
            self.transfer_timeout,
            self.files.download(url, dest, callback),
        );

        tokio::select! {
            _ = token.cancelled() => return Err(AppError::Cancelled(song_id.to_string())),
            outcome = transfer => match outcome {
                Ok(Ok(_report)) => {}
                Ok(Err(e)) => return Err(as_transfer_failure(e)),
                Err(_) => {
                    return Err(AppError::TransferFailed(format!(
                        "{} transfer timed out after {:?}",
                        kind, self.transfer_timeout
                    )))
                }
            },
        }

        let stat = self.files.stat(dest).await.map_err(as_transfer_failure)?;
        if !stat.exists {
            return Err(AppError::TransferFailed(format!("{} file missing after transfer: {:?}", kind, dest)));
        }
        Ok(stat.size)
    }

    async fn rollback(&self, song_id: &str, written: &[PathBuf]) {
        for path in written {
            for candidate in [path.clone(), partial_path(path)] {
                if let Err(e) = self.files.delete(&candidate).await {
                    log::warn!("Failed to remove {:?} while rolling back song {}: {}", candidate, song_id, e);
                }
            }
        }
        if !written.is_empty() {
            log::info!("🧹 Rolled back {} file(s) of song {}", written.len(), song_id);
        }
    }

    async fn notify_completed(&self, entry: &DownloadedSong) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        let body = match entry.number {
            Some(number) => format!("#{} {} is available offline", number, entry.title),
            None => format!("{} is available offline", entry.title),
        };
        let notification = Notification { title: "Download complete".to_string(), body };

        if let Err(e) = notifier.notify(notification).await {
            log::warn!("Failed to post completion notification for song {}: {}", entry.id, e);
        }
    }

    fn register(&self, song_id: &str) -> Result<ActiveDownload<'_>> {
        let mut active = lock(&self.active);
        if active.contains_key(song_id) {
            return Err(AppError::AlreadyInProgress(song_id.to_string()));
        }

        let token = CancellationToken::new();
        active.insert(song_id.to_string(), token.clone());
        Ok(ActiveDownload {
            registry: &self.active,
            song_id: song_id.to_string(),
            token,
        })
    }

    /// Cancels the in-flight download of `song_id`. Returns whether one was running.
    pub fn cancel_download(&self, song_id: &str) -> bool {
        match lock(&self.active).get(song_id) {
            Some(token) => {
                log::info!("Cancelling download of song {}", song_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let active = lock(&self.active);
        if !active.is_empty() {
            log::info!("Cancelling {} active download(s)", active.len());
        }
        for token in active.values() {
            token.cancel();
        }
    }

    pub fn is_in_progress(&self, song_id: &str) -> bool {
        lock(&self.active).contains_key(song_id)
    }

    /// Deletes the song's files and its manifest entry.
    ///
    /// File deletion errors are logged and ignored; the result reflects the
    /// manifest mutation only. Returns `false` if the song is not downloaded.
    pub async fn delete_song(&self, song_id: &str) -> bool {
        let entry = match self.manifest.get(song_id).await {
            Some(entry) => entry,
            None => return false,
        };

        self.delete_files(&entry).await;

        match self.manifest.remove(song_id).await {
            Ok(_) => {
                log::info!("🗑️ Deleted offline copy of song {}", song_id);
                true
            }
            Err(e) => {
                log::error!("Failed to remove song {} from the manifest: {}", song_id, e);
                false
            }
        }
    }

    /// Deletes every downloaded song. `false` only if the manifest could not be emptied.
    ///
    /// Commits wait until the clear is done, so a song finishing meanwhile is kept.
    pub async fn clear_all_downloads(&self) -> bool {
        let _commit = self.commit_lock.lock().await;
        let entries = self.manifest.list().await;
        for entry in &entries {
            self.delete_song(&entry.id).await;
        }

        match self.manifest.replace_all(Vec::new()).await {
            Ok(()) => {
                log::info!("🗑️ Cleared {} downloaded song(s)", entries.len());
                true
            }
            Err(e) => {
                log::error!("Failed to clear the download manifest: {}", e);
                false
            }
        }
    }

    async fn delete_files(&self, entry: &DownloadedSong) {
        for (kind, record) in entry.artifacts() {
            if let Err(e) = self.files.delete(&record.local_uri).await {
                log::warn!("Failed to delete {} file {:?} of song {}: {}", kind, record.local_uri, entry.id, e);
            }
        }
    }

    /// Removes files under the artifact directories that no manifest entry
    /// references. Skipped while downloads are running or when the manifest
    /// cannot be read. Returns the number of files removed.
    pub async fn prune_orphans(&self) -> usize {
        if !lock(&self.active).is_empty() {
            log::warn!("Skipping orphan pruning while downloads are in progress");
            return 0;
        }

        let entries = match self.manifest.try_list().await {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Skipping orphan pruning, manifest unreadable: {}", e);
                return 0;
            }
        };
        let referenced: HashSet<PathBuf> = entries
            .iter()
            .flat_map(|entry| entry.artifacts().map(|(_, record)| record.local_uri.clone()))
            .collect();

        let mut removed = 0;
        for dir in self.layout.directories() {
            let files = match self.files.list_directory(&dir).await {
                Ok(files) => files,
                Err(e) => {
                    log::warn!("Failed to list {:?}: {}", dir, e);
                    continue;
                }
            };

            for file in files.into_iter().filter(|file| !referenced.contains(file)) {
                match self.files.delete(&file).await {
                    Ok(()) => {
                        log::debug!("Removed orphaned file {:?}", file);
                        removed += 1;
                    }
                    Err(e) => log::warn!("Failed to remove orphaned file {:?}: {}", file, e),
                }
            }
        }

        if removed > 0 {
            log::info!("🧹 Pruned {} orphaned file(s)", removed);
        }
        removed
    }

    /// Receives every progress event of every download from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadProgress> {
        self.events.subscribe()
    }

    pub async fn downloaded_songs(&self) -> Vec<DownloadedSong> {
        self.manifest.list().await
    }

    pub async fn downloaded_song(&self, song_id: &str) -> Option<DownloadedSong> {
        self.manifest.get(song_id).await
    }

    pub async fn is_downloaded(&self, song_id: &str) -> bool {
        self.manifest.is_present(song_id).await
    }

    /// Stored file for one artifact of a downloaded song, for playback.
    pub async fn local_path(&self, song_id: &str, kind: ArtifactKind) -> Option<PathBuf> {
        let entry = self.manifest.get(song_id).await?;
        entry.artifact(kind).map(|record| record.local_uri.clone())
    }

    pub async fn settings(&self) -> DownloadSettings {
        self.settings.get().await
    }

    pub async fn update_settings(&self, update: &SettingsUpdate) -> Result<DownloadSettings> {
        self.settings.update(update).await
    }

    pub async fn default_options(&self) -> DownloadOptions {
        DownloadOptions::from_settings(&self.settings.get().await)
    }

    /// Whether background downloads may start now: enabled in settings and on Wi-Fi.
    pub async fn should_auto_download(&self) -> bool {
        if !self.settings.get().await.auto_download_on_wifi {
            return false;
        }
        self.network.is_connected().await && self.network.connection_kind().await == ConnectionKind::Wifi
    }

    pub async fn current_usage(&self) -> u64 {
        self.quota.current_usage().await
    }

    pub async fn storage_info(&self) -> StorageInfo {
        let settings = self.settings.get().await;
        self.quota.storage_info(&settings).await
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }
}

/// File store failures during a transfer surface as `TransferFailed` unless already classified.
fn as_transfer_failure(error: AppError) -> AppError {
    match error.kind() {
        Some(_) => error,
        None => AppError::TransferFailed(error.to_string()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
