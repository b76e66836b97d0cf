//! Order-side context consumed by reconciliation.
//!
//! Orders, patients and ordered tests are owned by the order-management
//! system. The engine keeps a copy, refreshed by OMS order events, and
//! reads it when LIS results arrive.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::status::OrderStatus;

/// A customer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// OMS order id.
    pub order_id: String,
    /// City whose auto-approver signs results.
    pub city_code: String,
    /// Lab that collects samples and owns the order.
    pub servicing_lab_id: i64,
    /// Patient the order is for.
    pub patient_id: String,
    /// OMS order status.
    pub status: OrderStatus,
}

/// Patient demographics used to pick reference ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetail {
    /// OMS patient id.
    pub patient_id: String,
    /// Recorded date of birth.
    #[serde(default)]
    pub dob: Option<NaiveDate>,
    /// Estimate from a stated age, when no date of birth was recorded.
    #[serde(default)]
    pub expected_dob: Option<NaiveDate>,
    /// Gender as recorded, matched against reference ranges.
    #[serde(default)]
    pub gender: String,
}

impl PatientDetail {
    /// Recorded date of birth, falling back to the estimated one.
    pub fn effective_dob(&self) -> Option<NaiveDate> {
        self.dob.or(self.expected_dob)
    }
}

/// A test as ordered in the OMS, before any LIS result arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedTest {
    /// OMS test id, unique across orders.
    pub central_test_id: String,
    /// LIS test code.
    pub test_code: String,
    /// Display name.
    #[serde(default)]
    pub test_name: String,
    /// Lab that runs the test.
    pub processing_lab_id: i64,
    /// The processing lab is operated in-house.
    #[serde(default)]
    pub processing_lab_inhouse: bool,
    /// Sample barcodes collected for the test.
    #[serde(default)]
    pub barcodes: Vec<String>,
}

/// One LIS visit registered against an order at a lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderVisit {
    /// LIS visit id.
    pub visit_id: String,
    /// Lab the visit was registered at.
    pub lab_id: i64,
}

/// The full order-side record as the OMS last described it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    /// Order header.
    pub order: Order,
    /// Patient demographics.
    pub patient: PatientDetail,
    /// LIS visits registered for the order.
    pub visits: Vec<OrderVisit>,
    /// Tests currently on the order.
    pub tests: Vec<OrderedTest>,
}

impl OrderRecord {
    /// Reconciliation context for this order as seen from one visit.
    pub fn context(&self, visit_id: &str, lab_id: i64) -> OrderContext {
        OrderContext {
            visit_id: visit_id.to_string(),
            lab_id,
            order: self.order.clone(),
            patient: self.patient.clone(),
            tests: self.tests.clone(),
        }
    }

    /// Visit registered at `lab_id`, if any.
    pub fn visit_at(&self, lab_id: i64) -> Option<&OrderVisit> {
        self.visits.iter().find(|visit| visit.lab_id == lab_id)
    }

    /// Take `central_test_id` off the order.
    pub fn remove_test(&mut self, central_test_id: &str) -> Option<OrderedTest> {
        let index = self
            .tests
            .iter()
            .position(|test| test.central_test_id == central_test_id)?;
        Some(self.tests.remove(index))
    }
}

/// Everything the engine needs to know about the order behind a visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderContext {
    /// LIS visit id.
    pub visit_id: String,
    /// Lab the visit was registered at.
    pub lab_id: i64,
    /// Order header.
    pub order: Order,
    /// Patient demographics.
    pub patient: PatientDetail,
    /// Tests currently on the order.
    pub tests: Vec<OrderedTest>,
}

impl OrderContext {
    /// Ordered tests keyed by LIS test code.
    pub fn tests_by_code(&self) -> HashMap<&str, &OrderedTest> {
        self.tests.iter().map(|t| (t.test_code.as_str(), t)).collect()
    }

    /// Ordered test with LIS code `test_code`.
    pub fn find_test(&self, test_code: &str) -> Option<&OrderedTest> {
        self.tests.iter().find(|t| t.test_code == test_code)
    }
}

/// Mapping between an OMS pathologist account and its LIS identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pathologist {
    /// OMS user id.
    pub user_id: i64,
    /// LIS user id.
    pub lis_user_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_dob_prefers_recorded() {
        let recorded = NaiveDate::from_ymd_opt(1990, 1, 1);
        let expected = NaiveDate::from_ymd_opt(1985, 6, 1);
        let patient = PatientDetail {
            patient_id: "P1".into(),
            dob: recorded,
            expected_dob: expected,
            gender: "F".into(),
        };
        assert_eq!(patient.effective_dob(), recorded);

        let estimated = PatientDetail { dob: None, ..patient };
        assert_eq!(estimated.effective_dob(), expected);

        let unknown = PatientDetail { expected_dob: None, ..estimated };
        assert_eq!(unknown.effective_dob(), None);
    }

    fn record() -> OrderRecord {
        let test = |code: &str| OrderedTest {
            central_test_id: format!("CT-{code}"),
            test_code: code.into(),
            test_name: code.into(),
            processing_lab_id: 1,
            processing_lab_inhouse: false,
            barcodes: vec![],
        };
        OrderRecord {
            order: Order {
                order_id: "O1".into(),
                city_code: "BLR".into(),
                servicing_lab_id: 1,
                patient_id: "P1".into(),
                status: OrderStatus::Ordered,
            },
            patient: PatientDetail {
                patient_id: "P1".into(),
                ..PatientDetail::default()
            },
            visits: vec![
                OrderVisit {
                    visit_id: "V1".into(),
                    lab_id: 1,
                },
                OrderVisit {
                    visit_id: "V2".into(),
                    lab_id: 9,
                },
            ],
            tests: vec![test("GLU"), test("TSH")],
        }
    }

    #[test]
    fn test_remove_test_takes_only_named_test() {
        let mut record = record();
        let removed = record.remove_test("CT-GLU").unwrap();
        assert_eq!(removed.test_code, "GLU");
        assert_eq!(record.tests.len(), 1);
        assert!(record.remove_test("CT-GLU").is_none());
    }

    #[test]
    fn test_context_for_visit() {
        let record = record();
        assert_eq!(record.visit_at(9).unwrap().visit_id, "V2");
        assert!(record.visit_at(4).is_none());
        let context = record.context("V2", 9);
        assert_eq!(context.lab_id, 9);
        assert_eq!(context.order.order_id, "O1");
        assert!(context.find_test("TSH").is_some());
    }
}
