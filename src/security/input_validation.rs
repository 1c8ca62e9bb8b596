use crate::api::DownloadableSong;
use crate::downloader::SettingsUpdate;
use crate::errors::{AppError, Result};
use url::Url;

const MAX_ID_LENGTH: usize = 128;

#[derive(Debug, Clone, Copy, Default)]
pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    /// Identity fields must be present before anything touches the network.
    pub fn validate_song(&self, song: &DownloadableSong) -> Result<()> {
        if song.id.trim().is_empty() {
            return Err(AppError::InvalidInput("Song id cannot be empty".to_string()));
        }

        if song.id.len() > MAX_ID_LENGTH {
            return Err(AppError::InvalidInput(format!(
                "Song id too long (max {} characters)",
                MAX_ID_LENGTH
            )));
        }

        if song.id.contains('\0') {
            return Err(AppError::InvalidInput("Null bytes not allowed in song id".to_string()));
        }

        if song.title.trim().is_empty() {
            return Err(AppError::InvalidInput(format!("Song {} has no title", song.id)));
        }

        Ok(())
    }

    pub fn validate_url(&self, url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(AppError::Validation("URL cannot be empty".to_string()));
        }

        let parsed_url = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        match parsed_url.scheme() {
            "http" | "https" => {
                if parsed_url.host_str().is_none() {
                    return Err(AppError::Validation("URL must have a host".to_string()));
                }
                Ok(())
            }
            "file" => Ok(()),
            other => Err(AppError::Validation(format!(
                "Unsupported URL scheme: {}. Supported schemes: http, https, file",
                other
            ))),
        }
    }

    pub fn validate_settings_update(&self, update: &SettingsUpdate) -> Result<()> {
        if let Some(max_storage_size) = update.max_storage_size {
            if max_storage_size == 0 {
                return Err(AppError::Validation("maxStorageSize must be greater than zero".to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_song_requires_id_and_title() {
        let validator = InputValidator::new();
        assert!(validator.validate_song(&DownloadableSong::new("1", "Rock of Ages")).is_ok());
        assert!(matches!(
            validator.validate_song(&DownloadableSong::new(" ", "Rock of Ages")),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            validator.validate_song(&DownloadableSong::new("1", "")),
            Err(AppError::InvalidInput(_))
        ));
        assert!(validator.validate_song(&DownloadableSong::new("x".repeat(129), "T")).is_err());
    }

    #[test]
    fn test_url_schemes() {
        let validator = InputValidator::new();
        assert!(validator.validate_url("https://hymns.example.org/audio/1.mp3").is_ok());
        assert!(validator.validate_url("file:///tmp/1.txt").is_ok());
        assert!(validator.validate_url("ftp://example.org/1.mp3").is_err());
        assert!(validator.validate_url("").is_err());
    }

    #[test]
    fn test_zero_quota_rejected() {
        let validator = InputValidator::new();
        let update = SettingsUpdate { max_storage_size: Some(0), ..SettingsUpdate::default() };
        assert!(validator.validate_settings_update(&update).is_err());
        assert!(validator.validate_settings_update(&SettingsUpdate::default()).is_ok());
    }
}
