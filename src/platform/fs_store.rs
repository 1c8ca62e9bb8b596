use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;
use crate::downloader::http_pool::HttpPool;
use crate::errors::{AppError, Result};
use crate::platform::{FileStat, FileStore, TransferProgressFn, TransferReport};
use crate::utils::ensure_dir_exists;

/// File store on the local filesystem; remote artifacts go through the shared `HttpPool`.
pub struct LocalFileStore {
    http_pool: Arc<HttpPool>,
}

impl LocalFileStore {
    pub fn new(http_pool: Arc<HttpPool>) -> Self {
        Self { http_pool }
    }

    async fn copy_local(&self, source: &Path, dest: &Path, on_progress: Option<&TransferProgressFn<'_>>) -> Result<u64> {
        let bytes = tokio::fs::copy(source, dest).await?;
        if let Some(callback) = on_progress {
            callback(bytes, Some(bytes));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn ensure_directory(&self, path: &Path) -> Result<()> {
        ensure_dir_exists(path).await
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: Option<&TransferProgressFn<'_>>,
    ) -> Result<TransferReport> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::TransferFailed(format!("Invalid URL {}: {}", url, e)))?;

        let bytes_written = match parsed.scheme() {
            "http" | "https" => self.http_pool.download_to_file(url, dest, on_progress).await?,
            "file" => {
                let source = parsed
                    .to_file_path()
                    .map_err(|_| AppError::TransferFailed(format!("Invalid file URL: {}", url)))?;
                self.copy_local(&source, dest, on_progress).await?
            }
            other => {
                return Err(AppError::TransferFailed(format!("Unsupported URL scheme: {}", other)));
            }
        };

        Ok(TransferReport { bytes_written })
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => Ok(FileStat { exists: true, size: metadata.len() }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileStat::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}
