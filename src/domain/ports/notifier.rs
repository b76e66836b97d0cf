//! Operations alerting port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Port for the operations alerting sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Post `message` to `channel`.
    async fn send_alert(&self, channel: &str, message: &str) -> DomainResult<()>;
}
