use async_trait::async_trait;
use crate::errors::Result;
use crate::platform::{Notification, NotificationSink};

/// Notification sink for headless hosts: notifications end up in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        log::info!("🔔 {}: {}", notification.title, notification.body);
        Ok(())
    }
}
