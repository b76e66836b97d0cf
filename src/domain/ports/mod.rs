//! Port trait definitions (Hexagonal Architecture)
//!
//! The engine reaches every external collaborator through these traits:
//! - KeyValueStore: idempotency guards and staged payloads
//! - MasterDataClient: investigation and panel reference data
//! - HistoricalValueLookup: previously approved values for delta checks
//! - LisSourceClient: refetching visits from the LIS
//! - OrderLookup: orders, patients and pathologists
//! - ReconciliationRepository: transactional task state
//! - NotificationSink, EventPublisher, ReportStore: outbound side effects

pub mod event_publisher;
pub mod historical_values;
pub mod kv_store;
pub mod lis_source;
pub mod master_data;
pub mod notifier;
pub mod order_lookup;
pub mod reconciliation_repository;
pub mod report_store;

pub use event_publisher::EventPublisher;
pub use historical_values::{HistoricalValueLookup, PastValue};
pub use kv_store::KeyValueStore;
pub use lis_source::LisSourceClient;
pub use master_data::{InvestigationQuery, MasterDataClient};
pub use notifier::NotificationSink;
pub use order_lookup::OrderLookup;
pub use reconciliation_repository::{ChangeSet, ReconciliationRepository, TaskSnapshot};
pub use report_store::ReportStore;
