pub mod http_pool;
pub mod layout;
pub mod manager;
pub mod manifest;
pub mod progress;
pub mod quota;
pub mod settings;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use crate::api::DownloadableSong;
use crate::errors::ErrorKind;

pub use manager::{DownloadManager, DownloadManagerDeps};
pub use settings::{DownloadSettings, SettingsUpdate};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Lyrics,
    Audio,
    Notation,
}

impl ArtifactKind {
    /// Transfer order within one song.
    pub const ALL: [ArtifactKind; 3] = [ArtifactKind::Lyrics, ArtifactKind::Audio, ArtifactKind::Notation];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Lyrics => "lyrics",
            ArtifactKind::Audio => "audio",
            ArtifactKind::Notation => "notation",
        }
    }

    pub fn default_extension(&self) -> &'static str {
        match self {
            ArtifactKind::Lyrics => "txt",
            ArtifactKind::Audio => "mp3",
            ArtifactKind::Notation => "pdf",
        }
    }

    pub fn known_extensions(&self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Lyrics => &["txt", "json", "lrc", "html", "md"],
            ArtifactKind::Audio => &["mp3", "m4a", "aac", "ogg", "opus", "wav", "flac", "mid", "midi"],
            ArtifactKind::Notation => &["pdf", "png", "jpg", "jpeg", "svg", "musicxml", "xml"],
        }
    }

    /// Whether the transport reports fractional progress for this kind.
    pub fn reports_fractional_progress(&self) -> bool {
        matches!(self, ArtifactKind::Audio)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub local_uri: PathBuf,
    /// Measured size of the stored file.
    pub size: u64,
}

/// Manifest entry for a song whose requested artifacts were all stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedSong {
    pub id: String,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub title: String,
    pub download_date: DateTime<Utc>,
    #[serde(default)]
    pub lyrics: Option<ArtifactRecord>,
    #[serde(default)]
    pub audio: Option<ArtifactRecord>,
    #[serde(default)]
    pub notation: Option<ArtifactRecord>,
    pub total_size: u64,
}

impl DownloadedSong {
    pub fn new(song: &DownloadableSong) -> Self {
        Self {
            id: song.id.clone(),
            number: song.number,
            title: song.title.clone(),
            download_date: Utc::now(),
            lyrics: None,
            audio: None,
            notation: None,
            total_size: 0,
        }
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactRecord> {
        match kind {
            ArtifactKind::Lyrics => self.lyrics.as_ref(),
            ArtifactKind::Audio => self.audio.as_ref(),
            ArtifactKind::Notation => self.notation.as_ref(),
        }
    }

    pub fn artifacts(&self) -> impl Iterator<Item = (ArtifactKind, &ArtifactRecord)> + '_ {
        ArtifactKind::ALL
            .into_iter()
            .filter_map(move |kind| self.artifact(kind).map(|record| (kind, record)))
    }

    /// Stores the record and keeps `total_size` equal to the sum of artifact sizes.
    pub fn set_artifact(&mut self, kind: ArtifactKind, record: ArtifactRecord) {
        let slot = match kind {
            ArtifactKind::Lyrics => &mut self.lyrics,
            ArtifactKind::Audio => &mut self.audio,
            ArtifactKind::Notation => &mut self.notation,
        };
        *slot = Some(record);
        self.total_size = self.artifacts().map(|(_, record)| record.size).sum();
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadOptions {
    pub include_audio: bool,
    pub include_notation: bool,
    pub show_notification: bool,
}

impl DownloadOptions {
    pub fn from_settings(settings: &DownloadSettings) -> Self {
        Self {
            include_audio: settings.download_audio_by_default,
            include_notation: settings.download_notation_by_default,
            show_notification: settings.notify_on_complete,
        }
    }

    /// Lyrics are always requested.
    pub fn includes(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Lyrics => true,
            ArtifactKind::Audio => self.include_audio,
            ArtifactKind::Notation => self.include_notation,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub song_id: String,
    /// Overall progress for the song in `[0, 1]`.
    pub progress: f32,
    pub status: DownloadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}
