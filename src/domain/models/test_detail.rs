//! Test detail domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::TestStatus;

/// Who approved a test as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestApprovalSource {
    /// Approved by a pathologist inside the LIS.
    #[serde(rename = "ATTUNE")]
    Attune,
    /// Approved automatically by this engine.
    #[serde(rename = "OH")]
    Oh,
}

impl TestApprovalSource {
    /// Stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attune => "ATTUNE",
            Self::Oh => "OH",
        }
    }

    /// Parse a stored name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ATTUNE" => Some(Self::Attune),
            "OH" => Some(Self::Oh),
            _ => None,
        }
    }
}

/// Report generation progress for a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Test not yet final.
    #[default]
    NotReady,
    /// Waiting for the report worker.
    Queued,
    /// Report generated.
    Created,
    /// Report generation failed.
    CreationFailed,
}

impl ReportStatus {
    /// Stored snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotReady => "not_ready",
            Self::Queued => "queued",
            Self::Created => "created",
            Self::CreationFailed => "creation_failed",
        }
    }

    /// Parse a stored name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_ready" => Some(Self::NotReady),
            "queued" => Some(Self::Queued),
            "created" => Some(Self::Created),
            "creation_failed" => Some(Self::CreationFailed),
            _ => None,
        }
    }
}

/// One ordered diagnostic test within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDetail {
    /// Row id.
    pub id: Uuid,
    /// Owning task.
    pub task_id: Uuid,
    /// OMS order id.
    pub order_id: String,
    /// Canonical cross-system test id.
    pub central_test_id: String,
    /// LIS-side test id, empty until the LIS reports the test.
    pub lis_test_id: String,
    /// LIS test code.
    pub test_code: String,
    /// Display name.
    pub test_name: String,
    /// Department reported by the LIS.
    pub department: String,
    /// Aggregate status of the test.
    pub status: TestStatus,
    /// Lab that runs the test.
    pub processing_lab_id: i64,
    /// The processing lab is operated in-house.
    pub processing_lab_inhouse: bool,
    /// Who approved the test, once approved.
    pub approval_source: Option<TestApprovalSource>,
    /// Approved by the auto-approver.
    pub is_auto_approved: bool,
    /// Report generation progress.
    pub report_status: ReportStatus,
    /// SLA deadline for a pathologist decision.
    pub doctor_tat: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl TestDetail {
    /// Whether this test counts towards task completion for a task at `task_lab_id`.
    pub fn is_inhouse_for(&self, task_lab_id: i64) -> bool {
        self.processing_lab_id == task_lab_id || self.processing_lab_inhouse
    }
}

/// Per-test sidecar with sample barcodes and criticality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDetailMetadata {
    /// Test this metadata belongs to.
    pub test_details_id: Uuid,
    /// Sample barcodes.
    pub barcodes: Vec<String>,
    /// Any investigation of the test is critical.
    pub is_critical: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_source_strings() {
        assert_eq!(TestApprovalSource::Attune.as_str(), "ATTUNE");
        assert_eq!(TestApprovalSource::from_str("OH"), Some(TestApprovalSource::Oh));
        assert_eq!(TestApprovalSource::from_str("oh"), None);
        assert_eq!(
            serde_json::to_string(&TestApprovalSource::Attune).unwrap(),
            "\"ATTUNE\""
        );
    }

    #[test]
    fn test_report_status_default() {
        assert_eq!(ReportStatus::default(), ReportStatus::NotReady);
        assert_eq!(ReportStatus::from_str("created"), Some(ReportStatus::Created));
    }
}
