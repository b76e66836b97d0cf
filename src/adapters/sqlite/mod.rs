//! SQLite adapters: reconciliation state, order-side lookups and the
//! key-value store.

pub mod connection;
pub mod historical_values;
pub mod kv_store;
pub mod migrations;
pub mod order_lookup;
pub mod reconciliation_repository;

pub use connection::{create_pool, create_test_pool, ConnectionError};
pub use historical_values::SqliteHistoricalValues;
pub use kv_store::SqliteKeyValueStore;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use order_lookup::SqliteOrderLookup;
pub use reconciliation_repository::SqliteReconciliationRepository;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::DatabaseConfig;

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_datetime).transpose()
}

/// Parse an optional `YYYY-MM-DD` date from a SQLite row field.
pub fn parse_optional_date(s: Option<String>) -> DomainResult<Option<NaiveDate>> {
    s.filter(|s| !s.is_empty())
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse a stored enum string, naming the column in the error.
pub fn parse_enum<T>(column: &str, value: &str, parse: impl Fn(&str) -> Option<T>) -> DomainResult<T> {
    parse(value).ok_or_else(|| DomainError::SerializationError(format!("invalid {column}: {value}")))
}

/// Startup failures of the SQLite layer.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Pool setup failed.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    /// Migrations failed.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Open the configured database and bring its schema up to date.
pub async fn initialize_database(config: &DatabaseConfig) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(config).await?;
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await?;
    Ok(pool)
}
