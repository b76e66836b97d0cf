//! Downstream test-event publisher.

use std::time::Duration;

use async_trait::async_trait;

use super::JsonClient;
use crate::domain::errors::DomainResult;
use crate::domain::models::TestEvent;
use crate::domain::ports::EventPublisher;

/// Publishes test milestones over HTTP.
pub struct HttpEventPublisher {
    http: JsonClient,
}

impl HttpEventPublisher {
    /// Publisher for `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> DomainResult<Self> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, event: &TestEvent) -> DomainResult<()> {
        self.http.post_unit("/test-events", event).await
    }
}
