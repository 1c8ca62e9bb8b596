//! Collaborators the download manager depends on.
//!
//! Each trait is implemented by a host adapter (`fs_store`, `kv_store`,
//! `network`, `notify`) and by the in-memory doubles in `memory`.

pub mod fs_store;
pub mod kv_store;
pub mod memory;
pub mod network;
pub mod notify;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::errors::Result;

pub use fs_store::LocalFileStore;
pub use kv_store::JsonFileStore;
pub use memory::{MemoryFileStore, MemoryKeyValueStore};
pub use network::{HttpProbe, StaticNetworkStatus};
pub use notify::LogNotifier;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Wifi,
    Cellular,
    Other,
    Unknown,
}

#[async_trait]
pub trait NetworkStatus: Send + Sync {
    async fn is_connected(&self) -> bool;
    async fn connection_kind(&self) -> ConnectionKind;
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// Receives `(bytes_written, total_bytes)` as a transfer advances.
pub type TransferProgressFn<'a> = dyn Fn(u64, Option<u64>) + Send + Sync + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStat {
    pub exists: bool,
    pub size: u64,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn ensure_directory(&self, path: &Path) -> Result<()>;

    /// Fetches `url` into `dest`. A failed transfer may leave a partial file behind.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: Option<&TransferProgressFn<'_>>,
    ) -> Result<TransferReport>;

    async fn stat(&self, path: &Path) -> Result<FileStat>;

    /// Idempotent: deleting a missing file succeeds.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Files directly under `path`; a missing directory lists as empty.
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}
