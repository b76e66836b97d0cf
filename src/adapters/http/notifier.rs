//! Chat-webhook alert sink.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::JsonClient;
use crate::domain::errors::DomainResult;
use crate::domain::ports::NotificationSink;

/// Posts alerts to a chat webhook.
pub struct WebhookNotifier {
    http: JsonClient,
}

impl WebhookNotifier {
    /// Notifier posting to `url`.
    pub fn new(url: &str, timeout: Duration) -> DomainResult<Self> {
        Ok(Self {
            http: JsonClient::new(url, timeout)?,
        })
    }
}

#[derive(Serialize)]
struct Alert<'a> {
    channel: &'a str,
    text: &'a str,
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn send_alert(&self, channel: &str, message: &str) -> DomainResult<()> {
        self.http
            .post_unit("", &Alert { channel, text: message })
            .await
    }
}
