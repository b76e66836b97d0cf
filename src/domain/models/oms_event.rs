//! Order-management events: order create/update and test deletion.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::order::{Order, OrderRecord, OrderVisit, OrderedTest, PatientDetail};
use super::status::OrderStatus;
use crate::domain::errors::{DomainError, DomainResult};

/// The OMS view of an order after a create or update.
///
/// Carries the whole order: tests missing here are no longer ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmsOrderEvent {
    /// OMS order id.
    pub order_id: String,
    /// City whose auto-approver signs results.
    pub city_code: String,
    /// Lab that owns the order.
    pub servicing_lab_id: i64,
    /// Order status; defaults to `requested`.
    #[serde(default)]
    pub status: OrderStatus,
    /// Patient demographics.
    pub patient: PatientDetail,
    /// LIS visits registered so far.
    #[serde(default)]
    pub visits: Vec<OrderVisit>,
    /// Every test now on the order.
    #[serde(default)]
    pub tests: Vec<OrderedTest>,
}

impl OmsOrderEvent {
    /// Validate and convert into the stored order record.
    pub fn into_record(self) -> DomainResult<OrderRecord> {
        require("order_id", &self.order_id)?;
        require("city_code", &self.city_code)?;
        require("patient.patient_id", &self.patient.patient_id)?;
        for visit in &self.visits {
            require("visits[].visit_id", &visit.visit_id)?;
        }
        let mut seen = HashSet::new();
        for test in &self.tests {
            require("tests[].central_test_id", &test.central_test_id)?;
            require("tests[].test_code", &test.test_code)?;
            if !seen.insert(test.central_test_id.as_str()) {
                return Err(DomainError::ValidationFailed(format!(
                    "order '{}' lists test '{}' twice",
                    self.order_id, test.central_test_id
                )));
            }
        }

        Ok(OrderRecord {
            order: Order {
                order_id: self.order_id,
                city_code: self.city_code,
                servicing_lab_id: self.servicing_lab_id,
                patient_id: self.patient.patient_id.clone(),
                status: self.status,
            },
            patient: self.patient,
            visits: self.visits,
            tests: self.tests,
        })
    }
}

/// The OMS removed one test from an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmsTestDeleteEvent {
    /// OMS order id.
    pub order_id: String,
    /// OMS id of the removed test.
    pub central_test_id: String,
}

impl OmsTestDeleteEvent {
    /// Reject events missing either id.
    pub fn validate(&self) -> DomainResult<()> {
        require("order_id", &self.order_id)?;
        require("central_test_id", &self.central_test_id)
    }
}

fn require(field: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::ValidationFailed(format!("OMS event has no {field}")));
    }
    Ok(())
}
