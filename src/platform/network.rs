use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use crate::platform::{ConnectionKind, NetworkStatus};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connectivity oracle that issues a HEAD request to a well-known endpoint.
///
/// A desktop host has no portable way to tell Wi-Fi from cellular, so the
/// connection kind is whatever the caller configured (`Unknown` by default).
pub struct HttpProbe {
    client: Client,
    probe_url: String,
    kind: ConnectionKind,
}

impl HttpProbe {
    pub fn new(client: Client, probe_url: impl Into<String>) -> Self {
        Self {
            client,
            probe_url: probe_url.into(),
            kind: ConnectionKind::Unknown,
        }
    }

    pub fn with_connection_kind(mut self, kind: ConnectionKind) -> Self {
        self.kind = kind;
        self
    }
}

#[async_trait]
impl NetworkStatus for HttpProbe {
    async fn is_connected(&self) -> bool {
        let request = self.client.head(&self.probe_url).timeout(PROBE_TIMEOUT).send();
        match request.await {
            Ok(response) => {
                log::debug!("Connectivity probe {} answered {}", self.probe_url, response.status());
                true
            }
            Err(e) => {
                log::warn!("Connectivity probe {} failed: {}", self.probe_url, e);
                false
            }
        }
    }

    async fn connection_kind(&self) -> ConnectionKind {
        self.kind
    }
}

/// Fixed answers, for hosts that already know their connectivity (and for tests).
#[derive(Debug, Clone, Copy)]
pub struct StaticNetworkStatus {
    connected: bool,
    kind: ConnectionKind,
}

impl StaticNetworkStatus {
    pub fn new(connected: bool, kind: ConnectionKind) -> Self {
        Self { connected, kind }
    }

    pub fn online() -> Self {
        Self::new(true, ConnectionKind::Wifi)
    }

    pub fn offline() -> Self {
        Self::new(false, ConnectionKind::Unknown)
    }
}

#[async_trait]
impl NetworkStatus for StaticNetworkStatus {
    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connection_kind(&self) -> ConnectionKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_status() {
        assert!(StaticNetworkStatus::online().is_connected().await);
        assert_eq!(StaticNetworkStatus::online().connection_kind().await, ConnectionKind::Wifi);
        assert!(!StaticNetworkStatus::offline().is_connected().await);
    }

    #[tokio::test]
    async fn test_probe_against_unroutable_host_reports_offline() {
        let probe = HttpProbe::new(Client::new(), "http://127.0.0.1:9/")
            .with_connection_kind(ConnectionKind::Cellular);
        assert!(!probe.is_connected().await);
        assert_eq!(probe.connection_kind().await, ConnectionKind::Cellular);
    }
}
