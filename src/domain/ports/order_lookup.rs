//! Order-side reads: visits, orders and pathologists.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{OrderContext, OrderRecord, Pathologist};

/// Read access to orders and the people acting on them.
#[async_trait]
pub trait OrderLookup: Send + Sync {
    /// Resolve an LIS visit to its order, patient and ordered tests.
    async fn find_by_visit(&self, visit_id: &str) -> DomainResult<Option<OrderContext>>;

    /// The stored order record for `order_id`.
    async fn find_by_order(&self, order_id: &str) -> DomainResult<Option<OrderRecord>>;

    /// Every pathologist with an LIS account.
    async fn pathologists(&self) -> DomainResult<Vec<Pathologist>>;
}
