//! Transactional persistence of tasks, tests and results.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    InvestigationResult, InvestigationResultMetadata, OrderRecord, Remark, ReportStatus, RerunInvestigationResult,
    Task, TestDetail, TestDetailMetadata,
};

/// Everything persisted for one order's task.
#[derive(Debug, Clone, Default)]
pub struct TaskSnapshot {
    /// `None` until the first LIS event creates the task.
    pub task: Option<Task>,
    /// Tests of the task.
    pub tests: Vec<TestDetail>,
    /// Per-test metadata.
    pub test_metadata: Vec<TestDetailMetadata>,
    /// Investigation results of all tests.
    pub investigations: Vec<InvestigationResult>,
    /// Rerun results of all tests.
    pub rerun_results: Vec<RerunInvestigationResult>,
}

impl TaskSnapshot {
    /// Investigation results stored under one test.
    pub fn investigations_for(&self, test_details_id: Uuid) -> impl Iterator<Item = &InvestigationResult> {
        self.investigations
            .iter()
            .filter(move |inv| inv.test_details_id == test_details_id)
    }

    /// Metadata row of one test.
    pub fn metadata_for(&self, test_details_id: Uuid) -> Option<&TestDetailMetadata> {
        self.test_metadata
            .iter()
            .find(|meta| meta.test_details_id == test_details_id)
    }
}

/// All writes produced by reconciling one event.
///
/// `task.version` holds the version read in the snapshot; applying the set
/// fails with a concurrency conflict if the stored row has moved on.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Task after reconciliation.
    pub task: Task,
    /// Insert the task rather than update it.
    pub task_is_new: bool,
    /// Tests to insert.
    pub create_tests: Vec<TestDetail>,
    /// Tests to overwrite.
    pub update_tests: Vec<TestDetail>,
    /// Tests dropped from the order, removed with their children.
    pub delete_test_ids: Vec<Uuid>,
    /// Test metadata to write.
    pub upsert_test_metadata: Vec<TestDetailMetadata>,
    /// Investigation results to insert.
    pub create_investigations: Vec<InvestigationResult>,
    /// Investigation results to overwrite.
    pub update_investigations: Vec<InvestigationResult>,
    /// Investigation metadata to write.
    pub upsert_investigation_metadata: Vec<InvestigationResultMetadata>,
    /// Rerun results to write.
    pub upsert_rerun_results: Vec<RerunInvestigationResult>,
    /// Remarks to write.
    pub upsert_remarks: Vec<Remark>,
}

impl ChangeSet {
    /// An empty set of writes against `task`.
    pub fn for_task(task: Task, task_is_new: bool) -> Self {
        Self {
            task,
            task_is_new,
            create_tests: Vec::new(),
            update_tests: Vec::new(),
            delete_test_ids: Vec::new(),
            upsert_test_metadata: Vec::new(),
            create_investigations: Vec::new(),
            update_investigations: Vec::new(),
            upsert_investigation_metadata: Vec::new(),
            upsert_rerun_results: Vec::new(),
            upsert_remarks: Vec::new(),
        }
    }
}

/// Transactional persistence of reconciled task state.
#[async_trait]
pub trait ReconciliationRepository: Send + Sync {
    /// Load the task for `order_id` together with its tests and investigations.
    async fn load_snapshot(&self, order_id: &str) -> DomainResult<TaskSnapshot>;

    /// Apply every write in `changes` atomically.
    async fn apply(&self, changes: &ChangeSet) -> DomainResult<()>;

    /// Store `record` as the current order-side state and apply `changes`,
    /// if any, in the same transaction.
    async fn apply_order(&self, record: &OrderRecord, changes: Option<&ChangeSet>) -> DomainResult<()>;

    /// Record the report upload outcome on `test_ids`.
    async fn set_report_status(&self, test_ids: &[Uuid], status: ReportStatus) -> DomainResult<()>;
}
