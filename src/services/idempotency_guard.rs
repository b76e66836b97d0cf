//! Per-entity mutual exclusion over the shared key-value store.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, warn};

use crate::domain::ports::KeyValueStore;

/// Marks an entity as being processed so a concurrent handler for the same
/// entity backs off.
///
/// Lookup failures are treated as "in progress": the event is not processed
/// rather than risking two writers on one order.
pub struct IdempotencyGuard {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    /// Guard whose claims expire after `ttl`.
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Claim `key`. Returns `false` when another holder has it or the store
    /// could not be consulted.
    pub async fn try_acquire(&self, key: &str) -> bool {
        match self.store.set_if_absent(key, "1", self.ttl).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(key, "event already in progress");
                false
            }
            Err(e) => {
                warn!(key, error = %e, "idempotency check failed, treating event as in progress");
                false
            }
        }
    }

    /// Release `key`. Failures are logged and the claim expires on its own.
    pub async fn release(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            error!(key, error = %e, "failed to release idempotency key");
        }
    }

    /// Run `work` while holding `key`.
    ///
    /// Returns `None` without running `work` if the key is held elsewhere.
    /// The key is released once `work` finishes, including when it panics.
    pub async fn run_exclusive<F, Fut, T>(&self, key: &str, work: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.try_acquire(key).await {
            return None;
        }
        let result = AssertUnwindSafe(work()).catch_unwind().await;
        self.release(key).await;
        match result {
            Ok(value) => Some(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
