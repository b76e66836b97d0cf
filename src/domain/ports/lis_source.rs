//! LIS refetch port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::LisVisitPayload;

/// Port for pulling a fresh copy of a visit from the LIS.
#[async_trait]
pub trait LisSourceClient: Send + Sync {
    /// Fetch `visit_id` with the report rendered in `report_format`.
    async fn fetch_visit(&self, visit_id: &str, report_format: &str) -> DomainResult<LisVisitPayload>;
}
