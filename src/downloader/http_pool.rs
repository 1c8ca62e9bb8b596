use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder, Proxy};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use crate::config::HttpConfig;
use crate::downloader::layout::partial_path;
use crate::errors::{AppError, Result};
use crate::platform::TransferProgressFn;

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// HTTP connection pool for artifact transfers
pub struct HttpPool {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

struct FetchError {
    error: AppError,
    retryable: bool,
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        Self { error: error.into(), retryable: true }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(error: std::io::Error) -> Self {
        Self { error: error.into(), retryable: false }
    }
}

impl HttpPool {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true);

        if let Some(proxy_url) = &config.proxy {
            log::info!("Using proxy for transfers: {}", proxy_url);
            builder = builder.proxy(Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            max_retries: config.max_retries.max(1),
            retry_delay: RETRY_DELAY,
        })
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }

    /// Streams `url` into `dest`, going through a `.part` file that is renamed on success.
    /// Server errors and dropped connections are retried; client errors are not.
    pub async fn download_to_file(
        &self,
        url: &str,
        dest: &Path,
        on_progress: Option<&TransferProgressFn<'_>>,
    ) -> Result<u64> {
        let part_path = partial_path(dest);

        for attempt in 1..=self.max_retries {
            log::debug!("🌐 [HTTP] Attempt {} of {} for URL: {}", attempt, self.max_retries, url);

            match self.fetch(url, &part_path, on_progress).await {
                Ok(bytes) => {
                    tokio::fs::rename(&part_path, dest).await?;
                    log::debug!("✅ [HTTP] Stored {} bytes at {:?}", bytes, dest);
                    return Ok(bytes);
                }
                Err(failure) => {
                    if let Err(e) = tokio::fs::remove_file(&part_path).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            log::warn!("Failed to remove partial file {:?}: {}", part_path, e);
                        }
                    }

                    if !failure.retryable || attempt == self.max_retries {
                        log::error!("❌ [HTTP] Transfer of {} failed after {} attempt(s): {}", url, attempt, failure.error);
                        return Err(failure.error);
                    }

                    log::warn!("⚠️ [HTTP] Attempt {} failed: {}; retrying in {:?}", attempt, failure.error, self.retry_delay);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }

        Err(AppError::TransferFailed(format!("No transfer attempts made for {}", url)))
    }

    async fn fetch(
        &self,
        url: &str,
        part_path: &Path,
        on_progress: Option<&TransferProgressFn<'_>>,
    ) -> std::result::Result<u64, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError {
                error: AppError::TransferFailed(format!("HTTP error: {}", status)),
                retryable: status.is_server_error(),
            });
        }

        let total_size = response.content_length();
        let mut file = tokio::fs::File::create(part_path).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let Some(callback) = on_progress {
                callback(downloaded, total_size);
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_builds_from_default_config() {
        let pool = HttpPool::new(&HttpConfig::default()).unwrap();
        assert_eq!(pool.max_retries, 3);
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let config = HttpConfig { proxy: Some("not a url".to_string()), ..HttpConfig::default() };
        assert!(HttpPool::new(&config).is_err());
    }
}
