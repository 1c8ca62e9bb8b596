use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::errors::{AppError, Result};

const APP_DIR: &str = "hymnal-downloader";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Base directory holding the `lyrics/`, `audio/` and `notation/` folders.
    pub download_root: PathBuf,
    /// JSON file backing the key-value store (manifest and settings).
    pub state_file: PathBuf,
    pub transfer_timeout_secs: u64,
    pub connectivity_probe_url: String,
    /// Skip the connectivity probe and report the device as online.
    pub assume_online: bool,
    pub http: HttpConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub max_connections: usize,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub user_agent: String,
    pub proxy: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|dir| dir.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            download_root: data_dir.join("downloads"),
            state_file: data_dir.join("state.json"),
            transfer_timeout_secs: 300,
            connectivity_probe_url: "https://www.google.com/generate_204".to_string(),
            assume_online: false,
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            timeout_secs: 120,
            connect_timeout_secs: 15,
            max_retries: 3,
            user_agent: format!("HymnalDownloader/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
        }
    }
}

impl AppConfig {
    /// Loads defaults, then the JSON config file (if any), then `HYMNAL__*` environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Json).required(false))
            .add_source(
                Environment::with_prefix("HYMNAL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Could not find config directory".to_string())))?;

        Ok(config_dir.join(APP_DIR).join("config.json"))
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.transfer_timeout_secs == 0 {
            return Err(AppError::Validation("transfer_timeout_secs must be greater than zero".to_string()));
        }
        if self.http.max_connections == 0 {
            return Err(AppError::Validation("http.max_connections must be greater than zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.json")).unwrap();

        assert_eq!(config.transfer_timeout_secs, 300);
        assert_eq!(config.http.max_retries, 3);
        assert!(config.http.proxy.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "download_root": "/tmp/hymns", "transfer_timeout_secs": 30, "http": { "max_retries": 1 } }"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.download_root, PathBuf::from("/tmp/hymns"));
        assert_eq!(config.transfer_timeout(), Duration::from_secs(30));
        assert_eq!(config.http.max_retries, 1);
        assert_eq!(config.http.max_connections, 4);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.assume_online = true;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert!(loaded.assume_online);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "transfer_timeout_secs": 0 }"#).unwrap();

        assert!(matches!(AppConfig::load_from(&path), Err(AppError::Validation(_))));
    }
}
