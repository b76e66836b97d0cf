//! State reconciliation: diffs incoming tests against the persisted task and
//! derives the task's aggregates.
//!
//! Tests are matched by their canonical central test id, investigations by
//! (test, LIS code). Nothing here performs I/O; the resulting [`ChangeSet`]
//! is applied atomically by the repository.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::{
    InvestigationResult, InvestigationStatus, OrderContext, OrderedTest, Task, TestDetail, TestDetailMetadata,
    TestEvent, TestEventKind, TestStatus,
};
use crate::domain::ports::{ChangeSet, TaskSnapshot};
use crate::services::rerun_handler::{QcFailures, RerunAuditor, QC_FAIL_REASON};
use crate::services::result_builder::{BuiltInvestigation, BuiltTest};

/// Outcome of reconciling one event against the stored task.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Writes to apply.
    pub changes: ChangeSet,
    /// Tests sent back for rerun because QC failed.
    pub qc_rerun_tests: usize,
}

impl Reconciliation {
    /// Tests inserted.
    pub fn created(&self) -> usize {
        self.changes.create_tests.len()
    }

    /// Tests overwritten.
    pub fn updated(&self) -> usize {
        self.changes.update_tests.len()
    }

    /// Tests removed because the order dropped them.
    pub fn deleted(&self) -> usize {
        self.changes.delete_test_ids.len()
    }

    /// Milestones for tests written by this event.
    pub fn test_events(&self, now: DateTime<Utc>) -> Vec<TestEvent> {
        self.changes
            .create_tests
            .iter()
            .chain(&self.changes.update_tests)
            .filter_map(|test| {
                let kind = match test.status {
                    TestStatus::Approve => TestEventKind::Approve,
                    TestStatus::ResultSaved | TestStatus::RerunResultSaved => TestEventKind::Completed,
                    _ => return None,
                };
                Some(TestEvent {
                    order_id: test.order_id.clone(),
                    test_id: test.id,
                    central_test_id: test.central_test_id.clone(),
                    status: kind,
                    occurred_at: now,
                })
            })
            .collect()
    }
}

/// Merges built tests and the current order into the stored task.
pub struct Reconciler<'a> {
    /// Order the task belongs to.
    pub context: &'a OrderContext,
    /// What is stored now.
    pub snapshot: &'a TaskSnapshot,
    /// Tests built from the Completed and Approve buckets.
    pub built: &'a [BuiltTest],
    /// Tests whose instrument QC failed.
    pub qc: &'a QcFailures,
    /// Builds rerun snapshots.
    pub auditor: &'a RerunAuditor,
    /// Clock used for timestamps.
    pub now: DateTime<Utc>,
}

impl Reconciler<'_> {
    /// Compute the writes for this event. Pure; nothing is stored.
    pub fn reconcile(&self) -> Reconciliation {
        let (task, task_is_new) = match &self.snapshot.task {
            Some(task) => (task.clone(), false),
            None => (Task::new(&self.context.order.order_id, self.context.lab_id), true),
        };
        let mut changes = ChangeSet::for_task(task, task_is_new);

        let built_by_code: HashMap<&str, &BuiltTest> =
            self.built.iter().map(|test| (test.test_code.as_str(), test)).collect();
        let existing_by_central: HashMap<&str, &TestDetail> = self
            .snapshot
            .tests
            .iter()
            .map(|test| (test.central_test_id.as_str(), test))
            .collect();

        let mut final_tests = Vec::with_capacity(self.context.tests.len());
        let mut final_metadata = Vec::with_capacity(self.context.tests.len());
        let mut qc_rerun_tests = 0;

        for ordered in &self.context.tests {
            let built = built_by_code.get(ordered.test_code.as_str()).copied();
            let qc_failed = built.is_some() && self.qc.test_failed(&ordered.test_code);

            let (test, metadata) = match existing_by_central.get(ordered.central_test_id.as_str()) {
                None => {
                    let (test, metadata) = self.create_test(&mut changes, ordered, built, qc_failed);
                    changes.create_tests.push(test.clone());
                    (test, metadata)
                }
                Some(existing) => {
                    let (test, metadata) = self.update_test(&mut changes, existing, ordered, built, qc_failed);
                    if test != **existing {
                        changes.update_tests.push(test.clone());
                    }
                    (test, metadata)
                }
            };
            if qc_failed && test.status == TestStatus::RerunRequested {
                qc_rerun_tests += 1;
            }
            changes.upsert_test_metadata.push(metadata.clone());
            final_tests.push(test);
            final_metadata.push(metadata);
        }

        let ordered_ids: HashSet<&str> = self
            .context
            .tests
            .iter()
            .map(|test| test.central_test_id.as_str())
            .collect();
        changes.delete_test_ids = self
            .snapshot
            .tests
            .iter()
            .filter(|test| !ordered_ids.contains(test.central_test_id.as_str()))
            .map(|test| test.id)
            .collect();

        refresh_task_completion(&mut changes.task, &final_tests, self.now);
        refresh_task_aggregates(&mut changes.task, &final_tests, &final_metadata, self.now);

        debug!(
            order_id = %self.context.order.order_id,
            created = changes.create_tests.len(),
            updated = changes.update_tests.len(),
            deleted = changes.delete_test_ids.len(),
            task_status = changes.task.status.as_str(),
            "reconciled order"
        );
        Reconciliation {
            changes,
            qc_rerun_tests,
        }
    }

    fn create_test(
        &self,
        changes: &mut ChangeSet,
        ordered: &OrderedTest,
        built: Option<&BuiltTest>,
        qc_failed: bool,
    ) -> (TestDetail, TestDetailMetadata) {
        let status = match built {
            _ if qc_failed => TestStatus::RerunRequested,
            Some(built) => built.status,
            None => TestStatus::ResultPending,
        };
        let test = TestDetail {
            id: Uuid::new_v4(),
            task_id: changes.task.id,
            order_id: self.context.order.order_id.clone(),
            central_test_id: ordered.central_test_id.clone(),
            lis_test_id: built.map(|b| b.lis_test_id.clone()).unwrap_or_default(),
            test_code: ordered.test_code.clone(),
            test_name: ordered.test_name.clone(),
            department: built
                .and_then(|b| b.investigations.first())
                .map(|inv| inv.result.department.clone())
                .unwrap_or_default(),
            status,
            processing_lab_id: ordered.processing_lab_id,
            processing_lab_inhouse: ordered.processing_lab_inhouse,
            approval_source: built.and_then(|b| b.approval_source),
            is_auto_approved: built.is_some_and(|b| b.is_auto_approved),
            report_status: Default::default(),
            doctor_tat: built.and_then(|b| b.doctor_tat),
            created_at: self.now,
            updated_at: self.now,
        };
        if let Some(built) = built {
            for incoming in &built.investigations {
                let mut result = incoming.result.clone();
                result.test_details_id = test.id;
                self.record_investigation(changes, incoming, &mut result, qc_failed);
                changes.create_investigations.push(result);
            }
        }
        let metadata = TestDetailMetadata {
            test_details_id: test.id,
            barcodes: ordered.barcodes.clone(),
            is_critical: built.is_some_and(|b| b.is_critical),
        };
        (test, metadata)
    }

    fn update_test(
        &self,
        changes: &mut ChangeSet,
        existing: &TestDetail,
        ordered: &OrderedTest,
        built: Option<&BuiltTest>,
        qc_failed: bool,
    ) -> (TestDetail, TestDetailMetadata) {
        let mut test = existing.clone();
        let previous = existing.status;
        let mut metadata = self
            .snapshot
            .metadata_for(existing.id)
            .cloned()
            .unwrap_or_else(|| TestDetailMetadata {
                test_details_id: existing.id,
                barcodes: Vec::new(),
                is_critical: false,
            });
        metadata.barcodes.clone_from(&ordered.barcodes);
        test.test_code.clone_from(&ordered.test_code);
        test.test_name.clone_from(&ordered.test_name);
        test.processing_lab_id = ordered.processing_lab_id;
        test.processing_lab_inhouse = ordered.processing_lab_inhouse;

        let Some(built) = built else {
            if test != *existing {
                test.updated_at = self.now;
            }
            return (test, metadata);
        };

        if let Some(next) = previous.reconcile_incoming(built.status) {
            if previous.accepts_incoming() {
                test.doctor_tat = built.doctor_tat;
            }
            test.status = next;
        } else if previous.accepts_incoming() {
            test.doctor_tat = built.doctor_tat;
        }
        if previous != TestStatus::Approve {
            test.approval_source = built.approval_source;
            test.is_auto_approved = built.is_auto_approved;
        }
        if qc_failed && previous != TestStatus::RerunRequested {
            if previous.can_transition_to(TestStatus::RerunRequested) {
                test.status = TestStatus::RerunRequested;
            } else {
                warn!(
                    test_code = %test.test_code,
                    status = previous.as_str(),
                    "QC failure cannot send test back for rerun"
                );
            }
        }
        if !built.lis_test_id.is_empty() {
            test.lis_test_id.clone_from(&built.lis_test_id);
        }
        metadata.is_critical = built.is_critical;

        let stored: HashMap<&str, &InvestigationResult> = self
            .snapshot
            .investigations_for(existing.id)
            .map(|inv| (inv.lis_code.as_str(), inv))
            .collect();
        let rerun = qc_failed && test.status == TestStatus::RerunRequested;
        for incoming in &built.investigations {
            match stored.get(incoming.result.lis_code.as_str()) {
                Some(current) => {
                    let mut merged = (*current).clone();
                    if !merged.merge_from(&incoming.result) {
                        debug!(
                            lis_code = %merged.lis_code,
                            "kept approved investigation over stale incoming result"
                        );
                    }
                    self.record_investigation(changes, incoming, &mut merged, rerun);
                    if merged != **current {
                        changes.update_investigations.push(merged);
                    }
                }
                None => {
                    let mut result = incoming.result.clone();
                    result.test_details_id = test.id;
                    self.record_investigation(changes, incoming, &mut result, rerun);
                    changes.create_investigations.push(result);
                }
            }
        }
        if test != *existing {
            test.updated_at = self.now;
        }
        (test, metadata)
    }

    /// Queue the sidecar rows of an investigation. QC-failed investigations
    /// are snapshotted and flipped to rerun before being written.
    fn record_investigation(
        &self,
        changes: &mut ChangeSet,
        incoming: &BuiltInvestigation,
        result: &mut InvestigationResult,
        qc_rerun: bool,
    ) {
        let mut metadata = incoming.metadata.clone();
        metadata.investigation_result_id = result.id;
        changes.upsert_investigation_metadata.push(metadata);
        changes.upsert_remarks.extend(incoming.remark_rows(result.id));
        if qc_rerun {
            changes
                .upsert_rerun_results
                .push(self.auditor.capture(result, QC_FAIL_REASON, "", self.now));
            result.status = InvestigationStatus::Rerun;
            result.updated_at = self.now;
        }
    }
}

/// Complete the task when every in-house test is finished, reopen it when
/// one is not. A task with no in-house tests has nothing left to wait for.
pub fn refresh_task_completion(task: &mut Task, tests: &[TestDetail], now: DateTime<Utc>) {
    let all_done = tests
        .iter()
        .filter(|test| test.is_inhouse_for(task.lab_id))
        .all(|test| test.status.is_terminal_complete());
    if all_done {
        if !task.is_completed() {
            task.complete(now);
        }
    } else if task.is_completed() {
        task.reopen(now);
    }
}

/// Recompute the doctor TAT and criticality of a task from its tests.
pub fn refresh_task_aggregates(
    task: &mut Task,
    tests: &[TestDetail],
    metadata: &[TestDetailMetadata],
    now: DateTime<Utc>,
) {
    let bearing: HashSet<Uuid> = tests
        .iter()
        .filter(|test| test.status.is_result_bearing())
        .map(|test| test.id)
        .collect();

    let doctor_tat = tests
        .iter()
        .filter(|test| bearing.contains(&test.id))
        .filter_map(|test| test.doctor_tat)
        .min();
    let is_critical = metadata
        .iter()
        .any(|meta| meta.is_critical && bearing.contains(&meta.test_details_id));

    let before = (task.doctor_tat, task.is_critical);
    if doctor_tat.is_some() {
        task.doctor_tat = doctor_tat;
    }
    task.is_critical = is_critical;
    if before != (task.doctor_tat, task.is_critical) {
        task.updated_at = now;
    }
}
