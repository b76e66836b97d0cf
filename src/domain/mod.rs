//! Domain layer for the LIS reconciliation engine
//!
//! Core models, port traits and errors. Nothing here performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
