//! Previously approved values, read from reconciled investigation results.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::parse_datetime;
use crate::domain::errors::DomainResult;
use crate::domain::models::InvestigationStatus;
use crate::domain::ports::{HistoricalValueLookup, PastValue};

/// Past approved values read from the investigation tables.
#[derive(Clone)]
pub struct SqliteHistoricalValues {
    pool: SqlitePool,
}

impl SqliteHistoricalValues {
    /// Lookup over `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoricalValueLookup for SqliteHistoricalValues {
    async fn last_approved_values(
        &self,
        patient_id: &str,
        investigation_ids: &[i64],
    ) -> DomainResult<HashMap<i64, PastValue>> {
        if investigation_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            r#"SELECT i.master_investigation_id, i.value, i.approved_at
               FROM investigation_results i
               JOIN test_details t ON t.id = i.test_details_id
               JOIN orders o ON o.order_id = t.order_id
               WHERE i.approved_at IS NOT NULL AND i.status = "#,
        );
        query.push_bind(InvestigationStatus::Approve.as_str());
        query.push(" AND o.patient_id = ");
        query.push_bind(patient_id);
        query.push(" AND i.master_investigation_id IN (");
        let mut ids = query.separated(", ");
        for id in investigation_ids {
            ids.push_bind(*id);
        }
        query.push(") ORDER BY i.approved_at ASC");

        let rows: Vec<(i64, String, String)> = query.build_query_as().fetch_all(&self.pool).await?;

        // Ascending order, so the latest approval per id wins.
        let mut latest = HashMap::new();
        for (id, value, approved_at) in rows {
            latest.insert(
                id,
                PastValue {
                    value,
                    approved_at: parse_datetime(&approved_at)?,
                },
            );
        }
        Ok(latest)
    }
}
