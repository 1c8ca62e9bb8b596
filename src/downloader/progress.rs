use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use crate::downloader::{ArtifactKind, DownloadProgress, DownloadStatus};
use crate::errors::AppError;

/// Per-call progress callback, invoked synchronously for every event of that call.
pub type ProgressCallback = Arc<dyn Fn(&DownloadProgress) + Send + Sync>;

// Fractional updates closer together than this are dropped.
const MIN_PROGRESS_STEP: f32 = 0.01;

/// Fans the events of one download attempt out to the caller's callback and
/// to every subscriber of the manager's broadcast channel.
///
/// At most one terminal event is emitted; anything after it is dropped.
pub struct ProgressReporter {
    song_id: String,
    callback: Option<ProgressCallback>,
    events: broadcast::Sender<DownloadProgress>,
    last_progress: Mutex<f32>,
    finished: AtomicBool,
}

impl ProgressReporter {
    pub fn new(
        song_id: impl Into<String>,
        callback: Option<ProgressCallback>,
        events: broadcast::Sender<DownloadProgress>,
    ) -> Self {
        Self {
            song_id: song_id.into(),
            callback,
            events,
            last_progress: Mutex::new(0.0),
            finished: AtomicBool::new(false),
        }
    }

    pub fn pending(&self) {
        self.emit(DownloadStatus::Pending, 0.0, None, None);
    }

    pub fn artifact_started(&self, index: usize, total: usize, kind: ArtifactKind) {
        self.emit(DownloadStatus::Downloading, overall(index, total, 0.0), Some(kind), None);
    }

    /// `fraction` is the completed share of the current artifact.
    pub fn artifact_progress(&self, index: usize, total: usize, kind: ArtifactKind, fraction: f32) {
        let progress = overall(index, total, fraction.clamp(0.0, 1.0));
        {
            let mut last = self.last_progress.lock().unwrap_or_else(|p| p.into_inner());
            if progress - *last < MIN_PROGRESS_STEP {
                return;
            }
            *last = progress;
        }
        self.emit(DownloadStatus::Downloading, progress, Some(kind), None);
    }

    pub fn artifact_finished(&self, index: usize, total: usize, kind: ArtifactKind) {
        self.emit(DownloadStatus::Downloading, overall(index, total, 1.0), Some(kind), None);
    }

    pub fn completed(&self) {
        self.emit(DownloadStatus::Completed, 1.0, None, None);
    }

    pub fn failed(&self, error: &AppError) {
        let progress = *self.last_progress.lock().unwrap_or_else(|p| p.into_inner());
        self.emit(DownloadStatus::Failed, progress, None, Some(error));
    }

    fn emit(&self, status: DownloadStatus, progress: f32, artifact: Option<ArtifactKind>, error: Option<&AppError>) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        if status.is_terminal() {
            self.finished.store(true, Ordering::SeqCst);
        } else {
            let mut last = self.last_progress.lock().unwrap_or_else(|p| p.into_inner());
            *last = last.max(progress);
        }

        let event = DownloadProgress {
            song_id: self.song_id.clone(),
            progress,
            status,
            artifact,
            error: error.map(|e| e.to_string()),
            error_kind: error.and_then(AppError::kind),
        };

        if let Some(callback) = &self.callback {
            callback(&event);
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn overall(index: usize, total: usize, fraction: f32) -> f32 {
    if total == 0 {
        return 1.0;
    }
    ((index as f32 + fraction) / total as f32).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_reporter() -> (ProgressReporter, Arc<Mutex<Vec<DownloadProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |event: &DownloadProgress| sink.lock().unwrap().push(event.clone()));
        let (tx, _rx) = broadcast::channel(16);
        (ProgressReporter::new("7", Some(callback), tx), seen)
    }

    #[test]
    fn test_overall_progress_spans_artifacts() {
        assert_eq!(overall(0, 2, 0.5), 0.25);
        assert_eq!(overall(1, 2, 1.0), 1.0);
        assert_eq!(overall(0, 0, 0.0), 1.0);
    }

    #[test]
    fn test_only_one_terminal_event() {
        let (reporter, seen) = collecting_reporter();
        reporter.pending();
        reporter.completed();
        reporter.failed(&AppError::Offline);
        reporter.artifact_started(0, 1, ArtifactKind::Lyrics);

        let statuses: Vec<DownloadStatus> = seen.lock().unwrap().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![DownloadStatus::Pending, DownloadStatus::Completed]);
    }

    #[test]
    fn test_fractional_updates_are_throttled() {
        let (reporter, seen) = collecting_reporter();
        for step in 0..=1000 {
            reporter.artifact_progress(0, 1, ArtifactKind::Audio, step as f32 / 1000.0);
        }
        let count = seen.lock().unwrap().len();
        assert!(count <= 101, "emitted {} events", count);
        assert!(count >= 90);
    }

    #[test]
    fn test_failure_carries_error_kind() {
        let (reporter, seen) = collecting_reporter();
        reporter.artifact_finished(0, 2, ArtifactKind::Lyrics);
        reporter.failed(&AppError::TransferFailed("reset".into()));

        let events = seen.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.status, DownloadStatus::Failed);
        assert_eq!(last.progress, 0.5);
        assert_eq!(last.error_kind, Some(crate::errors::ErrorKind::TransferFailed));
        assert!(last.error.as_deref().unwrap().contains("reset"));
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let (tx, mut rx) = broadcast::channel(16);
        let reporter = ProgressReporter::new("9", None, tx);
        reporter.pending();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.song_id, "9");
        assert_eq!(event.status, DownloadStatus::Pending);
    }
}
