//! Status state machines for orders, tasks, tests and investigations.
//!
//! Every status is a closed enum with a string form used for storage and a
//! set of valid transitions. Test statuses additionally map onto the numeric
//! status codes understood by the order-management system.

use serde::{Deserialize, Serialize};

/// Lifecycle of a customer order as tracked by the OMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Raised but not yet confirmed.
    #[default]
    Requested,
    /// Confirmed and sent to the lab.
    Ordered,
    /// All results done, report not yet dispatched.
    DoneNotSent,
    /// Cancelled by the OMS.
    Cancelled,
    /// Report dispatched.
    Completed,
}

impl OrderStatus {
    /// Stored snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Ordered => "ordered",
            Self::DoneNotSent => "done_not_sent",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Parse a stored name, accepting the US spelling of `canceled`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "requested" => Some(Self::Requested),
            "ordered" => Some(Self::Ordered),
            "done_not_sent" => Some(Self::DoneNotSent),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Status of a pathologist task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a pathologist.
    #[default]
    Pending,
    /// Opened by a pathologist.
    InProgress,
    /// A pathologist withheld approval.
    WithheldApproval,
    /// Waiting on a second signature.
    CoAuthorize,
    /// Every in-house test reached a final state.
    Completed,
}

impl TaskStatus {
    /// Stored snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::WithheldApproval => "withheld_approval",
            Self::CoAuthorize => "co_authorize",
            Self::Completed => "completed",
        }
    }

    /// Parse a stored name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "withheld_approval" => Some(Self::WithheldApproval),
            "co_authorize" => Some(Self::CoAuthorize),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Valid transitions from this status.
    ///
    /// A completed task may reopen into any working status; which one is
    /// decided by the remembered `previous_status`.
    pub fn valid_transitions(&self) -> Vec<TaskStatus> {
        match self {
            Self::Pending => vec![Self::InProgress, Self::WithheldApproval, Self::CoAuthorize, Self::Completed],
            Self::InProgress => vec![Self::Pending, Self::WithheldApproval, Self::CoAuthorize, Self::Completed],
            Self::WithheldApproval => vec![Self::Pending, Self::InProgress, Self::CoAuthorize, Self::Completed],
            Self::CoAuthorize => vec![Self::Pending, Self::InProgress, Self::WithheldApproval, Self::Completed],
            Self::Completed => vec![Self::Pending, Self::InProgress, Self::WithheldApproval, Self::CoAuthorize],
        }
    }

    /// Whether `new_status` is reachable from this status.
    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Numeric status codes of the order-management system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OmsStatusCode {
    /// Order raised.
    Requested = 1,
    /// Order confirmed.
    Ordered = 2,
    /// Result final, not sent.
    CompletedNotSent = 3,
    /// Cancelled.
    Cancelled = 5,
    /// Result final and sent.
    CompletedSent = 6,
    /// Sample moving between labs.
    InTransfer = 7,
    /// Transfer between labs failed.
    TransferFailed = 8,
    /// The lab never got the sample.
    SampleNotReceived = 9,
    /// Sample collection postponed.
    CollectSampleLater = 10,
    /// Technician saved a draft result.
    TechnicianSaved = 11,
    /// Sample received at the lab.
    LabReceived = 12,
    /// Rerun requested.
    Rerun = 13,
}

impl OmsStatusCode {
    /// Every code, in ascending order.
    pub const ALL: [Self; 12] = [
        Self::Requested,
        Self::Ordered,
        Self::CompletedNotSent,
        Self::Cancelled,
        Self::CompletedSent,
        Self::InTransfer,
        Self::TransferFailed,
        Self::SampleNotReceived,
        Self::CollectSampleLater,
        Self::TechnicianSaved,
        Self::LabReceived,
        Self::Rerun,
    ];

    /// Numeric wire value.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Look up a status by its numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

/// Status of one ordered test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Ordered, no sample yet.
    #[default]
    Requested,
    /// Sample in the lab, waiting for a result.
    ResultPending,
    /// Result entered by the analyser.
    ResultSaved,
    /// Sample rejected by the lab.
    Rejected,
    /// Pathologist asked for a rerun.
    RerunRequested,
    /// Rerun result entered.
    RerunResultSaved,
    /// Pathologist withheld the result.
    Withheld,
    /// Waiting on a second signature.
    CoAuthorize,
    /// Approved by a pathologist or the auto-approver.
    Approve,
    /// Final, report not yet sent.
    CompletedNotSent,
    /// Final and reported.
    CompletedSent,
    /// Sample in transfer.
    InTransfer,
    /// Transfer failed.
    TransferFailed,
    /// Sample never arrived.
    SampleNotReceived,
    /// Collection postponed.
    CollectSampleLater,
    /// Sample received.
    LabReceived,
}

impl TestStatus {
    /// Every status, in declaration order.
    pub const ALL: [Self; 16] = [
        Self::Requested,
        Self::ResultPending,
        Self::ResultSaved,
        Self::Rejected,
        Self::RerunRequested,
        Self::RerunResultSaved,
        Self::Withheld,
        Self::CoAuthorize,
        Self::Approve,
        Self::CompletedNotSent,
        Self::CompletedSent,
        Self::InTransfer,
        Self::TransferFailed,
        Self::SampleNotReceived,
        Self::CollectSampleLater,
        Self::LabReceived,
    ];

    /// Stored snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::ResultPending => "result_pending",
            Self::ResultSaved => "result_saved",
            Self::Rejected => "rejected",
            Self::RerunRequested => "rerun_requested",
            Self::RerunResultSaved => "rerun_result_saved",
            Self::Withheld => "withheld",
            Self::CoAuthorize => "co_authorize",
            Self::Approve => "approve",
            Self::CompletedNotSent => "completed_not_sent",
            Self::CompletedSent => "completed_sent",
            Self::InTransfer => "in_transfer",
            Self::TransferFailed => "transfer_failed",
            Self::SampleNotReceived => "sample_not_received",
            Self::CollectSampleLater => "collect_sample_later",
            Self::LabReceived => "lab_received",
        }
    }

    /// Parse a stored name, ignoring case.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let lowered = s.to_lowercase();
        Self::ALL.into_iter().find(|status| status.as_str() == lowered)
    }

    /// Human readable label shown to operators.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Requested => "Requested",
            Self::ResultPending => "Result Pending",
            Self::ResultSaved => "Result Saved",
            Self::Rejected => "Rejected",
            Self::RerunRequested => "Rerun Requested",
            Self::RerunResultSaved => "Rerun Result Saved",
            Self::Withheld => "Withheld",
            Self::CoAuthorize => "Co-Authorize",
            Self::Approve => "Approved",
            Self::CompletedNotSent => "Completed Not Sent",
            Self::CompletedSent => "Completed Sent",
            Self::InTransfer => "In Transfer",
            Self::TransferFailed => "Transfer Failed",
            Self::SampleNotReceived => "Sample Not Received",
            Self::CollectSampleLater => "Collect Sample Later",
            Self::LabReceived => "Lab Received",
        }
    }

    /// OMS status code reported for this test status.
    pub fn oms_code(self) -> OmsStatusCode {
        match self {
            Self::Requested
            | Self::ResultPending
            | Self::ResultSaved
            | Self::RerunRequested
            | Self::RerunResultSaved
            | Self::Withheld
            | Self::CoAuthorize
            | Self::LabReceived => OmsStatusCode::Requested,
            Self::Approve | Self::CompletedNotSent => OmsStatusCode::CompletedNotSent,
            Self::Rejected => OmsStatusCode::Cancelled,
            Self::CompletedSent => OmsStatusCode::CompletedSent,
            Self::InTransfer => OmsStatusCode::InTransfer,
            Self::TransferFailed => OmsStatusCode::TransferFailed,
            Self::SampleNotReceived => OmsStatusCode::SampleNotReceived,
            Self::CollectSampleLater => OmsStatusCode::CollectSampleLater,
        }
    }

    /// Canonical test status for an OMS status code.
    pub fn from_oms_code(code: OmsStatusCode) -> Self {
        match code {
            OmsStatusCode::Requested | OmsStatusCode::Ordered => Self::Requested,
            OmsStatusCode::CompletedNotSent => Self::CompletedNotSent,
            OmsStatusCode::Cancelled => Self::Rejected,
            OmsStatusCode::CompletedSent => Self::CompletedSent,
            OmsStatusCode::InTransfer => Self::InTransfer,
            OmsStatusCode::TransferFailed => Self::TransferFailed,
            OmsStatusCode::SampleNotReceived => Self::SampleNotReceived,
            OmsStatusCode::CollectSampleLater => Self::CollectSampleLater,
            OmsStatusCode::TechnicianSaved => Self::ResultSaved,
            OmsStatusCode::LabReceived => Self::LabReceived,
            OmsStatusCode::Rerun => Self::RerunRequested,
        }
    }

    /// Statuses that count a test as finished when deciding task completion.
    pub fn is_terminal_complete(&self) -> bool {
        matches!(
            self,
            Self::Approve | Self::CompletedNotSent | Self::CompletedSent | Self::SampleNotReceived
        )
    }

    /// Statuses in which a result awaits a pathologist.
    pub fn is_result_bearing(&self) -> bool {
        matches!(
            self,
            Self::ResultSaved | Self::RerunResultSaved | Self::Withheld | Self::CoAuthorize
        )
    }

    /// Statuses from which any incoming LIS status is accepted.
    pub fn accepts_incoming(&self) -> bool {
        matches!(self, Self::ResultPending | Self::RerunRequested | Self::Rejected)
    }

    fn is_orthogonal_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected
                | Self::SampleNotReceived
                | Self::CollectSampleLater
                | Self::TransferFailed
                | Self::InTransfer
        )
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<TestStatus> {
        let side_exits = [
            Self::Rejected,
            Self::SampleNotReceived,
            Self::CollectSampleLater,
            Self::TransferFailed,
            Self::InTransfer,
        ];
        let mut next = match self {
            Self::Requested | Self::LabReceived => vec![
                Self::ResultPending,
                Self::ResultSaved,
                Self::RerunRequested,
                Self::Approve,
                Self::LabReceived,
            ],
            Self::ResultPending => vec![
                Self::ResultSaved,
                Self::RerunRequested,
                Self::Withheld,
                Self::CoAuthorize,
                Self::Approve,
            ],
            Self::ResultSaved => vec![Self::RerunRequested, Self::Withheld, Self::CoAuthorize, Self::Approve],
            Self::RerunRequested => vec![
                Self::RerunResultSaved,
                Self::Withheld,
                Self::CoAuthorize,
                Self::Approve,
            ],
            Self::RerunResultSaved | Self::Withheld | Self::CoAuthorize => vec![
                Self::RerunRequested,
                Self::Withheld,
                Self::CoAuthorize,
                Self::Approve,
            ],
            Self::Approve => vec![Self::CompletedNotSent, Self::CompletedSent, Self::RerunRequested],
            Self::CompletedNotSent => vec![Self::CompletedSent, Self::RerunRequested],
            Self::CompletedSent => vec![Self::RerunRequested],
            Self::Rejected => vec![
                Self::ResultPending,
                Self::ResultSaved,
                Self::RerunRequested,
                Self::Approve,
            ],
            Self::InTransfer => vec![Self::TransferFailed, Self::LabReceived, Self::ResultPending],
            Self::TransferFailed => vec![Self::InTransfer],
            Self::CollectSampleLater => vec![Self::Requested, Self::LabReceived],
            Self::SampleNotReceived => vec![],
        };
        if !self.is_terminal_complete() && !self.is_orthogonal_terminal() {
            next.extend(side_exits);
        }
        next.retain(|s| s != self);
        next
    }

    /// Whether `new_status` is reachable from this status.
    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }

    /// Resolve the stored status of an existing test against the status
    /// carried by an incoming LIS event. `None` means the stored status stays.
    pub fn reconcile_incoming(self, incoming: Self) -> Option<Self> {
        if self.accepts_incoming() {
            return match (self, incoming) {
                (Self::RerunRequested, Self::ResultSaved) => Some(Self::RerunResultSaved),
                (Self::RerunRequested, Self::ResultPending) => None,
                _ => Some(incoming),
            };
        }
        if incoming == Self::Approve
            && matches!(
                self,
                Self::ResultSaved | Self::RerunResultSaved | Self::Withheld | Self::CoAuthorize
            )
        {
            return Some(Self::Approve);
        }
        None
    }
}

/// Status of a single investigation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    /// No decision yet.
    #[default]
    Pending,
    /// Approved.
    Approve,
    /// Sent back for a rerun.
    Rerun,
    /// Withheld.
    Withheld,
    /// Needs a second signature.
    CoAuthorize,
}

impl InvestigationStatus {
    /// Stored snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approve => "approve",
            Self::Rerun => "rerun",
            Self::Withheld => "withheld",
            Self::CoAuthorize => "co_authorize",
        }
    }

    /// Parse a stored name, also accepting `approved`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approve" | "approved" => Some(Self::Approve),
            "rerun" => Some(Self::Rerun),
            "withheld" => Some(Self::Withheld),
            "co_authorize" => Some(Self::CoAuthorize),
            _ => None,
        }
    }

    /// Valid transitions from this status. Leaving `approve` is only possible
    /// through an explicit rerun.
    pub fn valid_transitions(&self) -> Vec<InvestigationStatus> {
        match self {
            Self::Pending => vec![Self::Approve, Self::Rerun, Self::Withheld, Self::CoAuthorize],
            Self::Approve => vec![Self::Rerun],
            Self::Rerun => vec![Self::Pending, Self::Approve, Self::Withheld, Self::CoAuthorize],
            Self::Withheld => vec![Self::Approve, Self::Rerun, Self::CoAuthorize],
            Self::CoAuthorize => vec![Self::Approve, Self::Rerun, Self::Withheld],
        }
    }

    /// Whether `new_status` is reachable from this status.
    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }

    /// Whether reconciliation may overwrite a stored investigation in this
    /// status with one reporting `incoming`.
    pub fn accepts_reconciled(self, incoming: Self) -> bool {
        !(self == Self::Approve && incoming == Self::Pending)
    }
}
