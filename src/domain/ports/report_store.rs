//! Report storage port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Destination for decoded visit reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a report and return where it was written.
    async fn store(&self, order_id: &str, visit_id: &str, pdf: &[u8]) -> DomainResult<String>;
}
