// Input descriptors supplied by the song catalog.

use serde::{Deserialize, Serialize};
use crate::downloader::{ArtifactKind, DownloadOptions};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadableSong {
    pub id: String,
    pub number: Option<u32>,
    pub title: String,
    pub lyrics_url: Option<String>,
    pub audio_url: Option<String>,
    pub notation_url: Option<String>,
    #[serde(default)]
    pub size: ArtifactSizes,
}

/// Declared byte sizes per artifact. Advisory only; stored files are re-measured.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactSizes {
    pub lyrics: Option<u64>,
    pub audio: Option<u64>,
    pub notation: Option<u64>,
}

impl ArtifactSizes {
    pub fn get(&self, kind: ArtifactKind) -> Option<u64> {
        match kind {
            ArtifactKind::Lyrics => self.lyrics,
            ArtifactKind::Audio => self.audio,
            ArtifactKind::Notation => self.notation,
        }
    }
}

impl DownloadableSong {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            number: None,
            title: title.into(),
            lyrics_url: None,
            audio_url: None,
            notation_url: None,
            size: ArtifactSizes::default(),
        }
    }

    /// Source URL for the artifact, ignoring blank values.
    pub fn url_for(&self, kind: ArtifactKind) -> Option<&str> {
        let url = match kind {
            ArtifactKind::Lyrics => self.lyrics_url.as_deref(),
            ArtifactKind::Audio => self.audio_url.as_deref(),
            ArtifactKind::Notation => self.notation_url.as_deref(),
        };
        url.map(str::trim).filter(|u| !u.is_empty())
    }

    /// Advisory size used for quota admission: lyrics always, audio and notation only when requested.
    pub fn candidate_size(&self, options: &DownloadOptions) -> u64 {
        ArtifactKind::ALL
            .iter()
            .filter(|kind| options.includes(**kind))
            .map(|kind| self.size.get(*kind).unwrap_or(0))
            .sum()
    }

    /// Artifacts this call will actually transfer, in fixed order.
    pub fn transfer_plan(&self, options: &DownloadOptions) -> Vec<(ArtifactKind, String)> {
        ArtifactKind::ALL
            .iter()
            .filter(|kind| options.includes(**kind))
            .filter_map(|kind| self.url_for(*kind).map(|url| (*kind, url.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hymn() -> DownloadableSong {
        let mut song = DownloadableSong::new("h-1", "Amazing Grace");
        song.lyrics_url = Some("https://example.org/1.txt".into());
        song.audio_url = Some("  ".into());
        song.notation_url = Some("https://example.org/1.pdf".into());
        song.size = ArtifactSizes { lyrics: Some(10), audio: Some(500), notation: Some(40) };
        song
    }

    #[test]
    fn test_candidate_size_counts_requested_only() {
        let song = hymn();
        let lyrics_only = DownloadOptions::default();
        assert_eq!(song.candidate_size(&lyrics_only), 10);

        let all = DownloadOptions { include_audio: true, include_notation: true, show_notification: false };
        assert_eq!(song.candidate_size(&all), 550);
    }

    #[test]
    fn test_plan_skips_blank_urls_and_keeps_order() {
        let song = hymn();
        let all = DownloadOptions { include_audio: true, include_notation: true, show_notification: false };
        let kinds: Vec<ArtifactKind> = song.transfer_plan(&all).into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![ArtifactKind::Lyrics, ArtifactKind::Notation]);
    }

    #[test]
    fn test_deserializes_catalog_json() {
        let json = r#"{"id":"42","number":42,"title":"Be Thou My Vision","lyricsUrl":"https://x/42.txt","audioUrl":null,"notationUrl":null,"size":{"lyrics":120}}"#;
        let song: DownloadableSong = serde_json::from_str(json).unwrap();
        assert_eq!(song.number, Some(42));
        assert_eq!(song.size.lyrics, Some(120));
        assert_eq!(song.url_for(ArtifactKind::Audio), None);
    }
}
