//! Key-value store port.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Shared key-value store used for idempotency guards and payload staging.
///
/// Expired entries behave as if they were absent.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value under `key`, if present and not expired.
    async fn get(&self, key: &str) -> DomainResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> DomainResult<()>;

    /// Store `value` only if `key` is absent or expired.
    ///
    /// Returns `true` when this call wrote the entry.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> DomainResult<bool>;

    /// Remove `key`. Missing keys are not an error.
    async fn delete(&self, key: &str) -> DomainResult<()>;
}
