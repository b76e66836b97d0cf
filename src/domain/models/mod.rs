//! Domain models and their re-exports.

pub mod config;
pub mod event;
pub mod investigation;
pub mod lis_payload;
pub mod master_data;
pub mod oms_event;
pub mod order;
pub mod status;
pub mod task;
pub mod test_detail;

pub use config::{
    AlertConfig, ApprovalConfig, Config, DatabaseConfig, GuardConfig, HttpConfig, LogConfig, LogFormat,
    ReportConfig, RetryConfig, RotationPolicy, WorkerConfig,
};
pub use event::{EventEnvelope, EventType, LisEvent, ProcessOutcome, TestEvent, TestEventKind};
pub use investigation::{
    Abnormality, ApprovalSource, FailureReason, InvestigationResult, InvestigationResultMetadata, MethodType,
    Remark, RemarkType, RerunInvestigationResult,
};
pub use lis_payload::{
    parse_lis_timestamp, LisBucket, LisGroup, LisNode, LisResult, LisVisitPayload, VisitDocument, NON_STATIONERY_PDF,
    STATIONERY_PDF,
};
pub use master_data::{
    InvestigationDetails, MasterInvestigation, MasterPanel, MasterReferenceRange, Range, ReferenceLabel,
    ResultType,
};
pub use oms_event::{OmsOrderEvent, OmsTestDeleteEvent};
pub use order::{Order, OrderContext, OrderRecord, OrderVisit, OrderedTest, PatientDetail, Pathologist};
pub use status::{InvestigationStatus, OmsStatusCode, OrderStatus, TaskStatus, TestStatus};
pub use task::Task;
pub use test_detail::{ReportStatus, TestApprovalSource, TestDetail, TestDetailMetadata};
