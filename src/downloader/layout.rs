use std::path::{Path, PathBuf};
use url::Url;
use crate::downloader::ArtifactKind;
use crate::utils::escape_file_component;

/// Where artifacts live: `{root}/{kind}/{songId}_{kind}.{ext}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    pub fn directories(&self) -> impl Iterator<Item = PathBuf> + '_ {
        ArtifactKind::ALL.into_iter().map(|kind| self.dir_for(kind))
    }

    pub fn path_for(&self, song_id: &str, kind: ArtifactKind, source_url: &str) -> PathBuf {
        let file_name = format!(
            "{}_{}.{}",
            escape_file_component(song_id),
            kind.as_str(),
            extension_for(kind, source_url)
        );
        self.dir_for(kind).join(file_name)
    }
}

/// Sibling file a transfer streams into before it is renamed onto `dest`.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Extension taken from the URL path when it is a known one for the kind.
pub fn extension_for(kind: ArtifactKind, source_url: &str) -> &'static str {
    let from_url = Url::parse(source_url).ok().and_then(|url| {
        let segment = url.path_segments()?.last()?.to_string();
        let (_, ext) = segment.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    });

    from_url
        .and_then(|ext| kind.known_extensions().iter().copied().find(|known| *known == ext))
        .unwrap_or_else(|| kind.default_extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_deterministic_per_kind() {
        let layout = StorageLayout::new("/data/hymns");
        assert_eq!(
            layout.path_for("12", ArtifactKind::Lyrics, "https://cdn.test/lyrics/12"),
            PathBuf::from("/data/hymns/lyrics/12_lyrics.txt")
        );
        assert_eq!(
            layout.path_for("12", ArtifactKind::Audio, "https://cdn.test/a/12.M4A?sig=x"),
            PathBuf::from("/data/hymns/audio/12_audio.m4a")
        );
        assert_eq!(
            layout.path_for("12", ArtifactKind::Notation, "https://cdn.test/n/12.exe"),
            PathBuf::from("/data/hymns/notation/12_notation.pdf")
        );
    }

    #[test]
    fn test_partial_path_keeps_directory() {
        let dest = Path::new("/data/audio/12_audio.mp3");
        assert_eq!(partial_path(dest), PathBuf::from("/data/audio/12_audio.mp3.part"));
    }

    #[test]
    fn test_unparseable_url_uses_default_extension() {
        assert_eq!(extension_for(ArtifactKind::Audio, "not a url"), "mp3");
    }

    #[test]
    fn test_directories() {
        let layout = StorageLayout::new("/r");
        let dirs: Vec<PathBuf> = layout.directories().collect();
        assert_eq!(dirs, vec![PathBuf::from("/r/lyrics"), PathBuf::from("/r/audio"), PathBuf::from("/r/notation")]);
    }
}
