//! LIS Reconciler - LIS/OMS event reconciliation and auto-approval engine
//!
//! Consumes result events pushed by a laboratory information system,
//! reconciles them into the order management system's tasks, tests and
//! investigation results, and auto-approves results that pass the
//! configured checks.
//!
//! # Architecture
//!
//! The crate follows a hexagonal layout:
//!
//! - **Domain Layer** (`domain`): models, port traits and errors
//! - **Service Layer** (`services`): normalisation, approval, reconciliation
//! - **Adapters** (`adapters`): `SQLite`, HTTP, filesystem and in-memory ports
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{Config, EventEnvelope, EventType, LisEvent, ProcessOutcome};
pub use infrastructure::config::ConfigLoader;
pub use infrastructure::logging::LoggerImpl;
pub use services::{EventProcessor, Ports};
