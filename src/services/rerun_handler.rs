//! Rerun workflow: QC failure detection, audit snapshots and explicit rerun events.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::{
    parse_lis_timestamp, InvestigationResult, InvestigationStatus, LisBucket, LisNode, LisResult,
    RerunInvestigationResult, TestDetail, TestStatus,
};
use crate::domain::ports::{ChangeSet, TaskSnapshot};
use crate::services::payload_normalizer::{BucketEntries, NormalizedPayload};
use crate::services::reconciler::refresh_task_aggregates;

/// Rerun reason recorded when QC failure triggers the rerun.
pub const QC_FAIL_REASON: &str = "qc_fail";

/// Codes that failed QC in the Completed bucket of one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QcFailures {
    /// Investigation codes that must not be auto-approved. A failing leaf
    /// also marks its enclosing test.
    pub codes: HashSet<String>,
    /// Top-level test codes that go back to the bench.
    pub test_codes: HashSet<String>,
}

impl QcFailures {
    /// Collect QC failures for a lab. Labs without QC enabled never fail.
    pub fn detect(payload: &NormalizedPayload, lab_id: i64, qc_enabled_labs: &BTreeSet<i64>) -> Self {
        let mut failures = Self::default();
        if !qc_enabled_labs.contains(&lab_id) {
            return failures;
        }
        let Some(entries) = payload.bucket(&LisBucket::Completed) else {
            return failures;
        };
        for node in entries.iter() {
            let test_code = node.test_code();
            if node.header().qc_failed() {
                failures.codes.insert(test_code.to_string());
                failures.test_codes.insert(test_code.to_string());
            }
            if !node.is_group() {
                continue;
            }
            for leaf in node.leaves().into_iter().filter(|leaf| leaf.qc_failed()) {
                failures.codes.insert(leaf.test_code.clone());
                failures.codes.insert(test_code.to_string());
                failures.test_codes.insert(test_code.to_string());
            }
        }
        if !failures.is_empty() {
            debug!(lab_id, tests = ?failures.test_codes, "QC failures detected");
        }
        failures
    }

    /// No test failed QC.
    pub fn is_empty(&self) -> bool {
        self.test_codes.is_empty()
    }

    /// Whether `test_code` failed QC.
    pub fn test_failed(&self, test_code: &str) -> bool {
        self.test_codes.contains(test_code)
    }
}

/// Builds rerun audit snapshots, reusing the row of an earlier rerun of the
/// same investigation.
pub struct RerunAuditor {
    existing: HashMap<(Uuid, String), Uuid>,
    triggered_by: String,
}

impl RerunAuditor {
    /// Auditor seeded with the rerun rows already stored for the task.
    pub fn new(previous: &[RerunInvestigationResult], triggered_by: impl Into<String>) -> Self {
        Self {
            existing: previous
                .iter()
                .map(|row| ((row.test_details_id, row.lis_code.clone()), row.id))
                .collect(),
            triggered_by: triggered_by.into(),
        }
    }

    /// Snapshot `investigation` as sent back for a rerun.
    pub fn capture(
        &self,
        investigation: &InvestigationResult,
        reason: &str,
        remarks: &str,
        triggered_at: DateTime<Utc>,
    ) -> RerunInvestigationResult {
        let id = self
            .existing
            .get(&(investigation.test_details_id, investigation.lis_code.clone()))
            .copied()
            .unwrap_or_else(Uuid::new_v4);
        RerunInvestigationResult {
            id,
            test_details_id: investigation.test_details_id,
            lis_code: investigation.lis_code.clone(),
            master_investigation_id: investigation.master_investigation_id,
            investigation_name: investigation.name.clone(),
            investigation_value: investigation.value.clone(),
            device_value: investigation.device_value.clone(),
            result_type: investigation.result_type,
            rerun_reason: reason.to_string(),
            rerun_remarks: remarks.to_string(),
            rerun_triggered_by: self.triggered_by.clone(),
            rerun_triggered_at: triggered_at,
            entered_by: investigation.entered_by,
            entered_at: investigation.entered_at,
        }
    }
}

/// Leaves of a rerun entry that the LIS asked to run again. A bare
/// investigation is rerun as a whole.
fn rerun_leaves(node: &LisNode) -> Vec<&LisResult> {
    match node {
        LisNode::Investigation(leaf) => vec![leaf],
        LisNode::Group(_) => node
            .leaves()
            .into_iter()
            .filter(|leaf| leaf.bucket() == LisBucket::Rerun)
            .collect(),
        LisNode::Unsupported { .. } => Vec::new(),
    }
}

/// Writes produced by an explicit rerun event.
#[derive(Debug, Clone)]
pub struct RerunPlan {
    /// Writes to apply.
    pub changes: ChangeSet,
    /// Tests that moved into `rerun_requested` with this event.
    pub rerun_tests: Vec<TestDetail>,
}

/// Translate the Rerun bucket of a payload into state changes on an
/// existing task. Returns `None` when the order has no task yet.
pub fn plan_rerun_event(
    snapshot: &TaskSnapshot,
    entries: &BucketEntries,
    triggered_by: &str,
    now: DateTime<Utc>,
) -> Option<RerunPlan> {
    let task = snapshot.task.clone()?;
    let auditor = RerunAuditor::new(&snapshot.rerun_results, triggered_by);
    let mut changes = ChangeSet::for_task(task, false);
    let mut tests: Vec<TestDetail> = snapshot.tests.clone();
    let mut rerun_tests = Vec::new();

    for node in entries.iter() {
        let Some(test) = tests.iter_mut().find(|t| t.test_code == node.test_code()) else {
            debug!(test_code = node.test_code(), "rerun entry has no matching test");
            continue;
        };
        let newly_rerun = test.status != TestStatus::RerunRequested;
        if newly_rerun {
            test.status = TestStatus::RerunRequested;
            test.updated_at = now;
            changes.update_tests.push(test.clone());
            rerun_tests.push(test.clone());
        }

        for leaf in rerun_leaves(node) {
            let Some(existing) = snapshot
                .investigations_for(test.id)
                .find(|inv| inv.lis_code == leaf.test_code)
            else {
                continue;
            };
            if newly_rerun {
                let triggered_at = parse_lis_timestamp(&leaf.rerun_time).unwrap_or(now);
                changes.upsert_rerun_results.push(auditor.capture(
                    existing,
                    &leaf.rerun_reason,
                    &leaf.rerun_remarks,
                    triggered_at,
                ));
            }
            if existing.status != InvestigationStatus::Rerun {
                let mut investigation = existing.clone();
                investigation.status = InvestigationStatus::Rerun;
                investigation.updated_at = now;
                changes.update_investigations.push(investigation);
            }
        }
    }

    refresh_task_aggregates(&mut changes.task, &tests, &snapshot.test_metadata, now);
    Some(RerunPlan { changes, rerun_tests })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        Abnormality, ApprovalSource, FailureReason, LisVisitPayload, MethodType, ResultType, Task,
        TestDetailMetadata,
    };
    use crate::services::test_support::{completed_leaf, group, leaf, visit};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 2, 12, 0, 0).unwrap()
    }

    fn qc_leaf(code: &str) -> LisNode {
        LisNode::Investigation(LisResult {
            qc_status: "Fail".into(),
            ..leaf(code, "5", "Completed")
        })
    }

    fn test_detail(task: &Task, code: &str, status: TestStatus) -> TestDetail {
        TestDetail {
            id: Uuid::new_v4(),
            task_id: task.id,
            order_id: task.order_id.clone(),
            central_test_id: format!("CT-{code}"),
            lis_test_id: format!("{code}-id"),
            test_code: code.into(),
            test_name: format!("{code} test"),
            department: String::new(),
            status,
            processing_lab_id: task.lab_id,
            processing_lab_inhouse: false,
            approval_source: None,
            is_auto_approved: false,
            report_status: Default::default(),
            doctor_tat: Some(now() + Duration::minutes(30)),
            created_at: now(),
            updated_at: now(),
        }
    }

    fn investigation(test: &TestDetail, code: &str, status: InvestigationStatus) -> InvestigationResult {
        InvestigationResult {
            id: Uuid::new_v4(),
            test_details_id: test.id,
            lis_code: code.into(),
            name: format!("{code} name"),
            master_investigation_id: 31,
            master_method_mapping_id: 310,
            value: "4.2".into(),
            device_value: "4.21".into(),
            result_type: ResultType::Numeric,
            department: String::new(),
            uom: String::new(),
            method: String::new(),
            method_type: MethodType::Manual,
            reference_range_text: String::new(),
            status,
            abnormality: Abnormality::Normal,
            is_abnormal: false,
            is_critical: false,
            is_auto_approved: false,
            approval_source: ApprovalSource::Na,
            auto_approval_failure_reason: FailureReason::Na,
            entered_by: 5,
            entered_at: Some(now()),
            approved_by: 0,
            approved_at: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn test_qc_failures_only_for_enabled_labs() {
        let payload = NormalizedPayload::new("V1", visit(vec![qc_leaf("GLU")]));
        assert!(QcFailures::detect(&payload, 1, &BTreeSet::new()).is_empty());

        let failures = QcFailures::detect(&payload, 1, &BTreeSet::from([1]));
        assert!(failures.test_failed("GLU"));
        assert!(failures.codes.contains("GLU"));
    }

    #[test]
    fn test_qc_failed_leaf_marks_parent_panel() {
        let panel = group("LFT", "Completed", vec![completed_leaf("ALT", "20"), qc_leaf("AST")]);
        let payload = NormalizedPayload::new("V1", visit(vec![panel, completed_leaf("GLU", "90")]));

        let failures = QcFailures::detect(&payload, 1, &BTreeSet::from([1]));
        assert_eq!(failures.test_codes, HashSet::from(["LFT".to_string()]));
        assert_eq!(failures.codes, HashSet::from(["LFT".to_string(), "AST".to_string()]));
        assert!(!failures.test_failed("GLU"));
    }

    #[test]
    fn test_qc_failures_ignore_other_buckets() {
        let approved = LisNode::Investigation(LisResult {
            qc_status: "Fail".into(),
            ..leaf("GLU", "5", "Approve")
        });
        let payload = NormalizedPayload::new("V1", visit(vec![approved]));
        assert!(QcFailures::detect(&payload, 1, &BTreeSet::from([1])).is_empty());
    }

    #[test]
    fn test_auditor_reuses_existing_rows() {
        let task = Task::new("O1", 1);
        let test = test_detail(&task, "GLU", TestStatus::ResultSaved);
        let inv = investigation(&test, "GLU", InvestigationStatus::Pending);

        let first = RerunAuditor::new(&[], "lis").capture(&inv, QC_FAIL_REASON, "", now());
        assert_eq!(first.rerun_triggered_by, "lis");
        assert_eq!(first.investigation_value, "4.2");
        assert_eq!(first.device_value, "4.21");

        let again = RerunAuditor::new(std::slice::from_ref(&first), "lis").capture(&inv, "hemolysed", "", now());
        assert_eq!(again.id, first.id);
        assert_eq!(again.rerun_reason, "hemolysed");

        let mut other = inv.clone();
        other.lis_code = "HB".into();
        let fresh = RerunAuditor::new(&[first.clone()], "lis").capture(&other, "x", "", now());
        assert_ne!(fresh.id, first.id);
    }

    #[test]
    fn test_rerun_event_moves_tests_and_snapshots_rerun_leaves() {
        let mut task = Task::new("O1", 1);
        task.doctor_tat = Some(now() + Duration::hours(5));
        let lft = test_detail(&task, "LFT", TestStatus::ResultSaved);
        let glu = test_detail(&task, "GLU", TestStatus::RerunRequested);
        let alt = investigation(&lft, "ALT", InvestigationStatus::Pending);
        let ast = investigation(&lft, "AST", InvestigationStatus::Pending);
        let glu_inv = investigation(&glu, "GLU", InvestigationStatus::Rerun);
        let snapshot = TaskSnapshot {
            task: Some(task.clone()),
            tests: vec![lft.clone(), glu.clone()],
            test_metadata: vec![TestDetailMetadata {
                test_details_id: lft.id,
                barcodes: vec![],
                is_critical: true,
            }],
            investigations: vec![alt, ast.clone(), glu_inv],
            rerun_results: vec![],
        };

        let rerun_ast = LisNode::Investigation(LisResult {
            rerun_reason: "Clotted sample".into(),
            rerun_time: "2026-10-02 10:15:00".into(),
            ..leaf("AST", "", "Rerun")
        });
        let payload = NormalizedPayload::new(
            "V1",
            LisVisitPayload {
                order_info: vec![
                    group("LFT", "Rerun", vec![completed_leaf("ALT", "20"), rerun_ast]),
                    LisNode::Investigation(leaf("GLU", "", "Rerun")),
                ],
                ..LisVisitPayload::default()
            },
        );
        let entries = payload.bucket(&LisBucket::Rerun).unwrap();

        let plan = plan_rerun_event(&snapshot, entries, "lis", now()).unwrap();
        assert_eq!(plan.rerun_tests.len(), 1);
        assert_eq!(plan.rerun_tests[0].id, lft.id);
        assert_eq!(plan.changes.update_tests[0].status, TestStatus::RerunRequested);

        assert_eq!(plan.changes.upsert_rerun_results.len(), 1);
        let audit = &plan.changes.upsert_rerun_results[0];
        assert_eq!(audit.lis_code, "AST");
        assert_eq!(audit.rerun_reason, "Clotted sample");
        assert_eq!(audit.rerun_triggered_by, "lis");
        assert_eq!(
            audit.rerun_triggered_at,
            Utc.with_ymd_and_hms(2026, 10, 2, 10, 15, 0).unwrap()
        );

        assert_eq!(plan.changes.update_investigations.len(), 1);
        assert_eq!(plan.changes.update_investigations[0].id, ast.id);
        assert_eq!(plan.changes.update_investigations[0].status, InvestigationStatus::Rerun);

        // No test is waiting on a pathologist any more.
        assert!(!plan.changes.task.is_critical);
        assert_eq!(plan.changes.task.doctor_tat, Some(now() + Duration::hours(5)));
    }

    #[test]
    fn test_rerun_event_without_task_is_ignored() {
        let payload = NormalizedPayload::new("V1", visit(vec![LisNode::Investigation(leaf("GLU", "", "Rerun"))]));
        let entries = payload.bucket(&LisBucket::Rerun).unwrap();
        assert!(plan_rerun_event(&TaskSnapshot::default(), entries, "lis", now()).is_none());
    }
}
