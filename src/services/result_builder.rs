//! Turns LIS entries into investigation results and test-level verdicts.
//!
//! A single-investigation test is decided on its own leaf. A panel pools the
//! device flags of all its leaves, decides every leaf, and is auto-approved
//! only when every leaf is.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::models::{
    ApprovalSource, FailureReason, InvestigationResult, InvestigationResultMetadata, InvestigationStatus,
    LisBucket, LisNode, LisResult, MasterInvestigation, MethodType, Remark, RemarkType, TestApprovalSource,
    TestStatus,
};
use crate::domain::ports::PastValue;
use crate::services::abnormality::classify;
use crate::services::auto_approval::{decide, ApprovalInput, ApprovalRules};
use crate::services::payload_normalizer::FlatInvestigations;

static UNKNOWN_INVESTIGATION: LazyLock<MasterInvestigation> = LazyLock::new(MasterInvestigation::default);

/// An investigation built from one LIS leaf, not yet attached to a test.
#[derive(Debug, Clone)]
pub struct BuiltInvestigation {
    /// Result row.
    pub result: InvestigationResult,
    /// Metadata row.
    pub metadata: InvestigationResultMetadata,
    /// Remarks to store with the result.
    pub remarks: Vec<(RemarkType, String)>,
}

impl BuiltInvestigation {
    /// Remark rows for the stored investigation `investigation_result_id`.
    pub fn remark_rows(&self, investigation_result_id: Uuid) -> Vec<Remark> {
        self.remarks
            .iter()
            .map(|(remark_type, description)| Remark {
                investigation_result_id,
                remark_type: *remark_type,
                description: description.clone(),
                remark_by: self.result.entered_by,
            })
            .collect()
    }
}

/// Everything derived for one test entry of an LIS payload.
#[derive(Debug, Clone)]
pub struct BuiltTest {
    /// LIS test code.
    pub test_code: String,
    /// LIS test id.
    pub lis_test_id: String,
    /// Built investigations in payload order.
    pub investigations: Vec<BuiltInvestigation>,
    /// Derived test status.
    pub status: TestStatus,
    /// Who approved the test, once approved.
    pub approval_source: Option<TestApprovalSource>,
    /// Every investigation auto-approved.
    pub is_auto_approved: bool,
    /// Any investigation is critical.
    pub is_critical: bool,
    /// SLA deadline for a pathologist.
    pub doctor_tat: Option<DateTime<Utc>>,
}

impl BuiltTest {
    /// Investigation with LIS code `lis_code`.
    pub fn investigation(&self, lis_code: &str) -> Option<&BuiltInvestigation> {
        self.investigations.iter().find(|inv| inv.result.lis_code == lis_code)
    }

    /// Investigations that failed auto-approval, with the reason.
    pub fn failures(&self) -> impl Iterator<Item = (&InvestigationResult, FailureReason)> {
        self.investigations
            .iter()
            .map(|inv| &inv.result)
            .filter(|r| !r.is_auto_approved && r.auto_approval_failure_reason != FailureReason::Na)
            .map(|r| (r, r.auto_approval_failure_reason))
    }
}

/// Inputs shared by every test of one event.
pub struct ResultBuilder<'a> {
    /// Master investigations keyed by LIS code.
    pub masters: &'a HashMap<String, MasterInvestigation>,
    /// Last approved values keyed by master investigation id.
    pub past_values: &'a HashMap<i64, PastValue>,
    /// OMS user ids keyed by LIS user id.
    pub pathologist_users: &'a HashMap<i64, i64>,
    /// Codes whose instrument QC failed.
    pub qc_failed_codes: &'a HashSet<String>,
    /// Auto-approval rules.
    pub rules: &'a ApprovalRules,
    /// OMS user id the auto-approver signs as.
    pub auto_approver_id: i64,
    /// Minutes a pathologist has to act.
    pub doctor_tat_minutes: i64,
    /// Clock used for timestamps.
    pub now: DateTime<Utc>,
}

impl ResultBuilder<'_> {
    /// Build the test for a top-level entry of `bucket`. Unsupported entries
    /// yield nothing.
    pub fn build(&self, node: &LisNode, bucket: &LisBucket) -> Option<BuiltTest> {
        let approve_event = *bucket == LisBucket::Approve;
        match node {
            LisNode::Investigation(leaf) => Some(self.build_single(leaf, approve_event)),
            LisNode::Group(group) => Some(self.build_panel(node, &group.header, approve_event)),
            LisNode::Unsupported { .. } => None,
        }
    }

    fn build_single(&self, leaf: &LisResult, approve_event: bool) -> BuiltTest {
        let mut investigation = self.investigation(leaf);
        self.apply_verdict(&mut investigation.result, leaf.is_im_device(), leaf.is_im_device_verified());
        let auto_approved = investigation.result.is_auto_approved;

        if approve_event {
            self.stamp_lis_approval(&mut investigation.result, leaf);
        } else if auto_approved {
            self.stamp_auto_approval(&mut investigation.result);
        }
        self.finish(leaf, vec![investigation], auto_approved, approve_event, approve_event)
    }

    fn build_panel(&self, node: &LisNode, header: &LisResult, approve_event: bool) -> BuiltTest {
        let flat = FlatInvestigations::from_nodes(std::iter::once(node));
        let leaves: Vec<&LisResult> = flat.iter().map(|(_, leaf)| leaf).collect();

        let im_device = leaves.iter().any(|leaf| leaf.is_im_device());
        let verified = leaves.iter().all(|leaf| leaf.is_im_device_verified());
        let lis_approved = approve_event && leaves.iter().all(|leaf| leaf.bucket() == LisBucket::Approve);

        let mut investigations: Vec<BuiltInvestigation> =
            leaves.iter().map(|leaf| self.investigation(leaf)).collect();
        for investigation in &mut investigations {
            self.apply_verdict(&mut investigation.result, im_device, verified);
        }
        let auto_approved =
            !investigations.is_empty() && investigations.iter().all(|inv| inv.result.is_auto_approved);

        if lis_approved {
            for investigation in &mut investigations {
                self.stamp_lis_approval(&mut investigation.result, header);
            }
        } else if auto_approved {
            for investigation in &mut investigations {
                self.stamp_auto_approval(&mut investigation.result);
            }
        }
        self.finish(header, investigations, auto_approved, approve_event, lis_approved)
    }

    fn finish(
        &self,
        header: &LisResult,
        investigations: Vec<BuiltInvestigation>,
        auto_approved: bool,
        approve_event: bool,
        lis_approved: bool,
    ) -> BuiltTest {
        let status = if auto_approved || lis_approved {
            TestStatus::Approve
        } else {
            TestStatus::ResultSaved
        };
        let approval_source = if approve_event {
            Some(TestApprovalSource::Attune)
        } else if auto_approved {
            Some(TestApprovalSource::Oh)
        } else {
            None
        };
        BuiltTest {
            test_code: header.test_code.clone(),
            lis_test_id: header.test_id.clone(),
            is_critical: investigations.iter().any(|inv| inv.result.is_critical),
            investigations,
            status,
            approval_source,
            is_auto_approved: auto_approved,
            doctor_tat: header
                .captured_at()
                .map(|at| at + Duration::minutes(self.doctor_tat_minutes)),
        }
    }

    fn master(&self, code: &str) -> &MasterInvestigation {
        self.masters.get(code).unwrap_or(&UNKNOWN_INVESTIGATION)
    }

    fn investigation(&self, leaf: &LisResult) -> BuiltInvestigation {
        let master = self.master(&leaf.test_code);
        let abnormality = classify(&leaf.test_value, &master.reference_range);
        let method = first_non_empty(master.method.trim(), leaf.method_name.trim());

        let result = InvestigationResult {
            id: Uuid::new_v4(),
            test_details_id: Uuid::nil(),
            lis_code: leaf.test_code.clone(),
            name: first_non_empty(&master.investigation_name, &leaf.test_name),
            master_investigation_id: master.investigation_id,
            master_method_mapping_id: master.investigation_method_mapping_id,
            value: leaf.test_value.clone(),
            device_value: leaf.device_actual_value.clone(),
            result_type: master.result_type,
            department: first_non_empty(&title_case(&master.department_name), &title_case(&leaf.department_name)),
            uom: first_non_empty(&master.unit, &leaf.uom_code),
            method_type: MethodType::classify(&method, &leaf.device_id),
            method,
            reference_range_text: first_non_empty(
                &master.reference_range.normal_range.reference_range_text,
                &leaf.reference_range,
            ),
            status: InvestigationStatus::Pending,
            abnormality,
            is_abnormal: abnormality.is_abnormal(),
            is_critical: abnormality.is_critical(),
            is_auto_approved: false,
            approval_source: ApprovalSource::Na,
            auto_approval_failure_reason: FailureReason::Na,
            entered_by: leaf.result_captured_by.max(0),
            entered_at: leaf.captured_at(),
            approved_by: 0,
            approved_at: None,
            created_at: self.now,
            updated_at: self.now,
        };
        let metadata = InvestigationResultMetadata {
            investigation_result_id: result.id,
            qc_flag: leaf.qc_flag.clone(),
            qc_lot_number: leaf.qc_lot_number.clone(),
            qc_value: leaf.qc_value.clone(),
            qc_westgard_warning: leaf.qc_west_gard_warning.clone(),
            qc_status: leaf.qc_status.clone(),
        };
        let remarks = [
            (RemarkType::Medical, &leaf.medical_remarks),
            (RemarkType::Technical, &leaf.technical_remarks),
        ]
        .into_iter()
        .filter(|(_, text)| !text.is_empty())
        .map(|(kind, text)| (kind, text.clone()))
        .collect();

        BuiltInvestigation {
            result,
            metadata,
            remarks,
        }
    }

    fn apply_verdict(&self, result: &mut InvestigationResult, im_device: bool, im_device_verified: bool) {
        let master = self.master(&result.lis_code);
        let verdict = decide(
            &ApprovalInput {
                value: &result.value,
                entered_at: result.entered_at,
                method_type: result.method_type,
                im_device,
                im_device_verified,
                investigation: master,
                past_value: self.past_values.get(&master.investigation_id),
                qc_failed: self.qc_failed_codes.contains(&result.lis_code),
            },
            self.rules,
        );
        result.is_auto_approved = verdict.approved;
        result.approval_source = verdict.source;
        result.auto_approval_failure_reason = verdict.reason;
    }

    /// Approval recorded by a pathologist in the LIS. Unknown approvers fall
    /// back to the auto-approval identity.
    fn stamp_lis_approval(&self, result: &mut InvestigationResult, source: &LisResult) {
        result.status = InvestigationStatus::Approve;
        result.approved_by = self
            .pathologist_users
            .get(&source.result_approved_by)
            .copied()
            .filter(|user_id| *user_id != 0)
            .unwrap_or(self.auto_approver_id);
        result.approved_at = source.approved_at();
    }

    fn stamp_auto_approval(&self, result: &mut InvestigationResult) {
        result.status = InvestigationStatus::Approve;
        result.approved_by = self.auto_approver_id;
        result.approved_at = Some(self.now);
    }
}

fn first_non_empty(preferred: &str, fallback: &str) -> String {
    let chosen = if preferred.is_empty() { fallback } else { preferred };
    chosen.to_string()
}

/// `"CLINICAL  biochemistry"` -> `"Clinical Biochemistry"`.
fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            chars
                .next()
                .map_or_else(String::new, |first| first.to_uppercase().chain(chars).collect())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Abnormality, MasterReferenceRange, Range, ReferenceLabel, ResultType};
    use crate::services::test_support::{group, leaf};
    use chrono::TimeZone;

    struct Fixture {
        masters: HashMap<String, MasterInvestigation>,
        past_values: HashMap<i64, PastValue>,
        pathologists: HashMap<i64, i64>,
        qc_failed: HashSet<String>,
        rules: ApprovalRules,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new(masters: Vec<MasterInvestigation>) -> Self {
            Self {
                masters: masters.into_iter().map(|m| (m.lis_code.clone(), m)).collect(),
                past_values: HashMap::new(),
                pathologists: HashMap::from([(7, 70)]),
                qc_failed: HashSet::new(),
                rules: ApprovalRules::default(),
                now: Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap(),
            }
        }

        fn builder(&self) -> ResultBuilder<'_> {
            ResultBuilder {
                masters: &self.masters,
                past_values: &self.past_values,
                pathologist_users: &self.pathologists,
                qc_failed_codes: &self.qc_failed,
                rules: &self.rules,
                auto_approver_id: 900,
                doctor_tat_minutes: 60,
                now: self.now,
            }
        }
    }

    fn glucose() -> MasterInvestigation {
        MasterInvestigation {
            investigation_id: 21,
            investigation_name: "Glucose Fasting".into(),
            investigation_method_mapping_id: 210,
            lis_code: "GLU".into(),
            department_name: "CLINICAL BIOCHEMISTRY".into(),
            unit: "mg/dL".into(),
            result_type: ResultType::Numeric,
            reference_range: MasterReferenceRange {
                normal_range: Range {
                    min_value: "70".into(),
                    max_value: "100".into(),
                    reference_range_text: "70 - 100".into(),
                    ..Range::default()
                },
                critical_range: Range {
                    min_value: "40".into(),
                    max_value: "400".into(),
                    ..Range::default()
                },
                auto_approval_range: Range {
                    min_value: "50".into(),
                    max_value: "200".into(),
                    ..Range::default()
                },
                reference_label: ReferenceLabel::Range,
                ..MasterReferenceRange::default()
            },
            ..MasterInvestigation::default()
        }
    }

    fn device_leaf(code: &str, value: &str, status: &str) -> LisResult {
        LisResult {
            device_id: "DEV1".into(),
            method_name: "Hexokinase".into(),
            ..leaf(code, value, status)
        }
    }

    #[test]
    fn test_single_device_result_in_range_is_auto_approved() {
        let fixture = Fixture::new(vec![glucose()]);
        let node = LisNode::Investigation(device_leaf("GLU", "92", "Completed"));

        let built = fixture.builder().build(&node, &LisBucket::Completed).unwrap();
        assert_eq!(built.status, TestStatus::Approve);
        assert_eq!(built.approval_source, Some(TestApprovalSource::Oh));
        assert!(built.is_auto_approved);

        let result = &built.investigations[0].result;
        assert_eq!(result.status, InvestigationStatus::Approve);
        assert_eq!(result.approval_source, ApprovalSource::Oh);
        assert_eq!(result.approved_by, 900);
        assert_eq!(result.approved_at, Some(fixture.now));
        assert_eq!(result.abnormality, Abnormality::Normal);
        assert_eq!(result.name, "Glucose Fasting");
        assert_eq!(result.department, "Clinical Biochemistry");
        assert_eq!(result.reference_range_text, "70 - 100");
        assert_eq!(result.method_type, MethodType::DeviceMeasured);
    }

    #[test]
    fn test_manual_result_waits_for_pathologist() {
        let fixture = Fixture::new(vec![glucose()]);
        let node = LisNode::Investigation(leaf("GLU", "92", "Completed"));

        let built = fixture.builder().build(&node, &LisBucket::Completed).unwrap();
        assert_eq!(built.status, TestStatus::ResultSaved);
        assert_eq!(built.approval_source, None);
        assert_eq!(
            built.doctor_tat,
            Some(Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap())
        );
        let result = &built.investigations[0].result;
        assert_eq!(result.status, InvestigationStatus::Pending);
        assert_eq!(result.auto_approval_failure_reason, FailureReason::ManualInput);
        assert_eq!(built.failures().count(), 1);
    }

    #[test]
    fn test_lis_approval_maps_pathologist() {
        let fixture = Fixture::new(vec![glucose()]);
        let approved = LisResult {
            result_approved_by: 7,
            result_approved_at: "2026-10-01 08:30:00".into(),
            ..leaf("GLU", "92", "Approve")
        };
        let built = fixture
            .builder()
            .build(&LisNode::Investigation(approved), &LisBucket::Approve)
            .unwrap();
        assert_eq!(built.status, TestStatus::Approve);
        assert_eq!(built.approval_source, Some(TestApprovalSource::Attune));
        let result = &built.investigations[0].result;
        assert_eq!(result.approved_by, 70);
        assert_eq!(
            result.approved_at,
            Some(Utc.with_ymd_and_hms(2026, 10, 1, 8, 30, 0).unwrap())
        );

        let unknown = LisResult {
            result_approved_by: 3,
            ..leaf("GLU", "92", "Approve")
        };
        let built = fixture
            .builder()
            .build(&LisNode::Investigation(unknown), &LisBucket::Approve)
            .unwrap();
        assert_eq!(built.investigations[0].result.approved_by, 900);
    }

    #[test]
    fn test_panel_requires_every_leaf_verified_by_device() {
        let mut hb = glucose();
        hb.lis_code = "HB".into();
        hb.investigation_id = 22;
        let fixture = Fixture::new(vec![glucose(), hb]);

        let verified = LisResult {
            im_device: "Yes".into(),
            im_device_flag: "AV".into(),
            ..device_leaf("GLU", "92", "Completed")
        };
        let unverified = LisResult {
            im_device: "no".into(),
            ..device_leaf("HB", "30", "Completed")
        };
        let panel = group(
            "PANEL",
            "Completed",
            vec![LisNode::Investigation(verified), LisNode::Investigation(unverified)],
        );

        let built = fixture.builder().build(&panel, &LisBucket::Completed).unwrap();
        assert_eq!(built.test_code, "PANEL");
        assert!(!built.is_auto_approved);
        assert_eq!(built.status, TestStatus::ResultSaved);
        assert!(built.is_critical, "30 is below the critical minimum of 40");
        for inv in &built.investigations {
            assert_eq!(inv.result.auto_approval_failure_reason, FailureReason::ImDevice);
            assert_eq!(inv.result.status, InvestigationStatus::Pending);
        }
    }

    #[test]
    fn test_panel_approve_event_needs_all_leaves_approved() {
        let fixture = Fixture::new(vec![glucose()]);
        let panel = group(
            "PANEL",
            "Approve",
            vec![
                LisNode::Investigation(leaf("GLU", "92", "Approve")),
                LisNode::Investigation(leaf("OTHER", "1", "Completed")),
            ],
        );
        let built = fixture.builder().build(&panel, &LisBucket::Approve).unwrap();
        assert_eq!(built.status, TestStatus::ResultSaved);
        assert_eq!(built.approval_source, Some(TestApprovalSource::Attune));
        assert!(built
            .investigations
            .iter()
            .all(|inv| inv.result.status == InvestigationStatus::Pending));
    }

    #[test]
    fn test_empty_panel_is_not_auto_approved() {
        let fixture = Fixture::new(vec![]);
        let built = fixture
            .builder()
            .build(&group("PANEL", "Completed", vec![]), &LisBucket::Completed)
            .unwrap();
        assert!(built.investigations.is_empty());
        assert!(!built.is_auto_approved);
        assert_eq!(built.status, TestStatus::ResultSaved);
    }

    #[test]
    fn test_qc_failed_code_blocks_approval() {
        let mut fixture = Fixture::new(vec![glucose()]);
        fixture.qc_failed.insert("GLU".into());
        let node = LisNode::Investigation(device_leaf("GLU", "92", "Completed"));
        let built = fixture.builder().build(&node, &LisBucket::Completed).unwrap();
        assert_eq!(
            built.investigations[0].result.auto_approval_failure_reason,
            FailureReason::QcFailed
        );
    }

    #[test]
    fn test_unknown_investigation_falls_back_to_lis_fields() {
        let fixture = Fixture::new(vec![]);
        let lis = LisResult {
            department_name: "CLINICAL  biochemistry".into(),
            uom_code: "U/L".into(),
            reference_range: "0-40".into(),
            result_captured_by: -4,
            medical_remarks: "Repeat sample".into(),
            ..leaf("ALT", "31", "Completed")
        };
        let built = fixture
            .builder()
            .build(&LisNode::Investigation(lis), &LisBucket::Completed)
            .unwrap();
        let inv = &built.investigations[0];
        assert_eq!(inv.result.name, "ALT test");
        assert_eq!(inv.result.department, "Clinical Biochemistry");
        assert_eq!(inv.result.uom, "U/L");
        assert_eq!(inv.result.reference_range_text, "0-40");
        assert_eq!(inv.result.entered_by, 0);
        assert_eq!(inv.result.abnormality, Abnormality::Unclassified);

        let remarks = inv.remark_rows(inv.result.id);
        assert_eq!(remarks.len(), 1);
        assert_eq!(remarks[0].remark_type, RemarkType::Medical);
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("hAEMATOLOGY"), "Haematology");
        assert_eq!(title_case("  "), "");
    }
}
