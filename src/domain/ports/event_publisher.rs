//! Downstream test milestone publishing.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::TestEvent;

/// Port for emitting test milestones to downstream consumers.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one milestone.
    async fn publish(&self, event: &TestEvent) -> DomainResult<()>;
}
