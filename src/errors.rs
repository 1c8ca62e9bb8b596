use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Device is offline")]
    Offline,

    #[error("Storage quota exceeded: {required} bytes requested, {available} bytes available")]
    QuotaExceeded { required: u64, available: u64 },

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Download cancelled: {0}")]
    Cancelled(String),

    #[error("Download already in progress: {0}")]
    AlreadyInProgress(String),

    #[error("Duplicate manifest entry: {0}")]
    DuplicateEntry(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Failure categories surfaced to UI layers through terminal progress events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Offline,
    QuotaExceeded,
    TransferFailed,
    PersistenceFailed,
    Cancelled,
    AlreadyInProgress,
}

impl AppError {
    /// Maps the error onto the download failure taxonomy, if it belongs to it.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            AppError::InvalidInput(_) | AppError::Validation(_) => Some(ErrorKind::InvalidInput),
            AppError::Offline => Some(ErrorKind::Offline),
            AppError::QuotaExceeded { .. } => Some(ErrorKind::QuotaExceeded),
            AppError::TransferFailed(_) => Some(ErrorKind::TransferFailed),
            AppError::PersistenceFailed(_) | AppError::DuplicateEntry(_) => {
                Some(ErrorKind::PersistenceFailed)
            }
            AppError::Cancelled(_) => Some(ErrorKind::Cancelled),
            AppError::AlreadyInProgress(_) => Some(ErrorKind::AlreadyInProgress),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_mapping() {
        assert_eq!(AppError::Offline.kind(), Some(ErrorKind::Offline));
        assert_eq!(
            AppError::QuotaExceeded { required: 10, available: 5 }.kind(),
            Some(ErrorKind::QuotaExceeded)
        );
        assert_eq!(
            AppError::DuplicateEntry("a".into()).kind(),
            Some(ErrorKind::PersistenceFailed)
        );
        assert_eq!(AppError::Storage("x".into()).kind(), None);
    }

    #[test]
    fn test_quota_message_mentions_sizes() {
        let msg = AppError::QuotaExceeded { required: 950, available: 900 }.to_string();
        assert!(msg.contains("950"));
        assert!(msg.contains("900"));
    }
}
