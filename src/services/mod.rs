//! Application services: event handling, reconciliation and auto-approval.

pub mod abnormality;
pub mod anomaly_detector;
pub mod auto_approval;
pub mod event_processor;
pub mod idempotency_guard;
pub mod payload_normalizer;
pub mod reconciler;
pub mod report_worker;
pub mod rerun_handler;
pub mod result_builder;
pub mod resync;
pub mod retry;

#[cfg(test)]
pub mod test_support;

pub use event_processor::{EventProcessor, Ports};
pub use idempotency_guard::IdempotencyGuard;
pub use report_worker::{ReportJob, ReportWorker};
pub use retry::RetryPolicy;
