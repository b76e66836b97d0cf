//! Past result lookup port.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;

/// Most recent approved value of an investigation for a patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PastValue {
    /// Value as reported.
    pub value: String,
    /// When it was approved.
    pub approved_at: DateTime<Utc>,
}

#[async_trait]
/// Port for previously approved results of a patient.
pub trait HistoricalValueLookup: Send + Sync {
    /// Latest approved value per master investigation id. Ids without an
    /// approved value are absent from the map.
    async fn last_approved_values(
        &self,
        patient_id: &str,
        investigation_ids: &[i64],
    ) -> DomainResult<HashMap<i64, PastValue>>;
}
