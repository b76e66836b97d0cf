//! In-process adapters for single-node runs and tests.

pub mod kv_store;
pub mod reconciliation_repository;

pub use kv_store::InMemoryKeyValueStore;
pub use reconciliation_repository::InMemoryReconciliationRepository;
