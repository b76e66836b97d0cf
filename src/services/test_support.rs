//! In-memory fakes of the ports and payload builders shared by service tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    InvestigationDetails, LisGroup, LisNode, LisResult, LisVisitPayload, MasterInvestigation, Order, OrderContext,
    OrderRecord, OrderStatus, OrderVisit, OrderedTest, PatientDetail, TestEvent,
};
use crate::domain::ports::{
    EventPublisher, HistoricalValueLookup, InvestigationQuery, LisSourceClient, MasterDataClient,
    NotificationSink, PastValue, ReportStore,
};

pub fn leaf(code: &str, value: &str, status: &str) -> LisResult {
    LisResult {
        test_id: format!("{code}-id"),
        test_code: code.into(),
        test_name: format!("{code} test"),
        test_value: value.into(),
        test_status: status.into(),
        result_captured_at: "2026-10-01T08:00:00".into(),
        result_captured_by: 5,
        ..LisResult::default()
    }
}

pub fn completed_leaf(code: &str, value: &str) -> LisNode {
    LisNode::Investigation(leaf(code, value, "Completed"))
}

pub fn group(code: &str, status: &str, children: Vec<LisNode>) -> LisNode {
    LisNode::Group(LisGroup {
        header: leaf(code, "", status),
        children,
    })
}

pub fn visit(nodes: Vec<LisNode>) -> LisVisitPayload {
    LisVisitPayload {
        order_id: "V1".into(),
        order_info: nodes,
        report_pdf_format: "StationeryPDF".into(),
        ..LisVisitPayload::default()
    }
}

pub fn order_context(codes: &[&str]) -> OrderContext {
    OrderContext {
        visit_id: "V1".into(),
        lab_id: 1,
        order: Order {
            order_id: "O1".into(),
            city_code: "BLR".into(),
            servicing_lab_id: 1,
            patient_id: "P1".into(),
            status: OrderStatus::Ordered,
        },
        patient: PatientDetail {
            patient_id: "P1".into(),
            dob: NaiveDate::from_ymd_opt(1990, 1, 1),
            expected_dob: None,
            gender: "female".into(),
        },
        tests: codes
            .iter()
            .map(|code| OrderedTest {
                central_test_id: format!("CT-{code}"),
                test_code: (*code).to_string(),
                test_name: format!("{code} test"),
                processing_lab_id: 1,
                processing_lab_inhouse: false,
                barcodes: vec![format!("BC-{code}")],
            })
            .collect(),
    }
}

/// The order behind [`order_context`], with visit V1 at lab 1.
pub fn order_record(codes: &[&str]) -> OrderRecord {
    let context = order_context(codes);
    OrderRecord {
        order: context.order,
        patient: context.patient,
        visits: vec![OrderVisit {
            visit_id: context.visit_id,
            lab_id: context.lab_id,
        }],
        tests: context.tests,
    }
}

#[derive(Default)]
pub struct FakeMasterData {
    investigations: Vec<MasterInvestigation>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeMasterData {
    pub fn with_investigations(investigations: Vec<MasterInvestigation>) -> Self {
        Self {
            investigations,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MasterDataClient for FakeMasterData {
    async fn get_investigation_details(
        &self,
        query: &InvestigationQuery,
    ) -> DomainResult<Vec<MasterInvestigation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DomainError::Transient("master data unavailable".into()));
        }
        Ok(self
            .investigations
            .iter()
            .filter(|inv| query.codes.contains(&inv.lis_code))
            .cloned()
            .collect())
    }

    async fn get_panel_details(&self, _query: &InvestigationQuery) -> DomainResult<InvestigationDetails> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DomainError::Transient("master data unavailable".into()));
        }
        Ok(InvestigationDetails {
            investigations: self.investigations.clone(),
            panels: Vec::new(),
        })
    }
}

#[derive(Default)]
pub struct FakeLisSource {
    responses: Mutex<VecDeque<DomainResult<LisVisitPayload>>>,
    calls: AtomicUsize,
}

impl FakeLisSource {
    pub fn returning(responses: Vec<DomainResult<LisVisitPayload>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LisSourceClient for FakeLisSource {
    async fn fetch_visit(&self, _visit_id: &str, _report_format: &str) -> DomainResult<LisVisitPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(DomainError::Transient("no scripted response".into())))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn send_alert(&self, channel: &str, message: &str) -> DomainResult<()> {
        self.sent.lock().unwrap().push((channel.to_string(), message.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<TestEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<TestEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &TestEvent) -> DomainResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeHistory {
    pub values: HashMap<i64, PastValue>,
}

#[async_trait]
impl HistoricalValueLookup for FakeHistory {
    async fn last_approved_values(
        &self,
        _patient_id: &str,
        investigation_ids: &[i64],
    ) -> DomainResult<HashMap<i64, PastValue>> {
        Ok(self
            .values
            .iter()
            .filter(|(id, _)| investigation_ids.contains(id))
            .map(|(id, value)| (*id, value.clone()))
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryReportStore {
    reports: Mutex<Vec<(String, String, usize)>>,
}

impl MemoryReportStore {
    pub fn stored(&self) -> Vec<(String, String, usize)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn store(&self, order_id: &str, visit_id: &str, pdf: &[u8]) -> DomainResult<String> {
        self.reports
            .lock()
            .unwrap()
            .push((order_id.to_string(), visit_id.to_string(), pdf.len()));
        Ok(format!("{order_id}/{visit_id}.pdf"))
    }
}
