//! Reconciliation repository held in process memory.
//!
//! Applies change sets with the same optimistic version check as the
//! SQLite repository, and answers order lookups from the order records it
//! stores. Used by service tests in place of SQLite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{OrderContext, OrderRecord, Pathologist, Remark, ReportStatus};
use crate::domain::ports::{ChangeSet, OrderLookup, ReconciliationRepository, TaskSnapshot};

#[derive(Debug, Default)]
struct State {
    snapshots: HashMap<String, TaskSnapshot>,
    orders: HashMap<String, OrderRecord>,
    pathologists: Vec<Pathologist>,
    remarks: Vec<Remark>,
}

/// Task state and order records behind one lock.
#[derive(Debug, Default)]
pub struct InMemoryReconciliationRepository {
    state: Mutex<State>,
    fail_next: AtomicBool,
}

impl InMemoryReconciliationRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository already holding `orders`, as if OMS events had stored
    /// them.
    pub fn with_orders(orders: Vec<OrderRecord>, pathologists: Vec<Pathologist>) -> Self {
        Self {
            state: Mutex::new(State {
                orders: orders
                    .into_iter()
                    .map(|record| (record.order.order_id.clone(), record))
                    .collect(),
                pathologists,
                ..State::default()
            }),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Make the next `apply` or `apply_order` fail with a database error.
    pub fn fail_next_apply(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Every remark written so far.
    pub async fn remarks(&self) -> Vec<Remark> {
        self.state.lock().await.remarks.clone()
    }

    fn take_injected_failure(&self) -> DomainResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DomainError::DatabaseError("injected apply failure".into()));
        }
        Ok(())
    }
}

fn upsert_by<T, K: PartialEq>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> K) {
    let wanted = key(&item);
    match items.iter_mut().find(|existing| key(existing) == wanted) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

/// Check the task version, then write every change. Nothing is written
/// when the check fails.
fn write_changes(state: &mut State, changes: &ChangeSet) -> DomainResult<()> {
    let conflict = || DomainError::ConcurrencyConflict {
        entity: "task".into(),
        id: changes.task.order_id.clone(),
    };
    let stored_version = state
        .snapshots
        .get(&changes.task.order_id)
        .and_then(|snapshot| snapshot.task.as_ref())
        .map(|task| task.version);
    match (changes.task_is_new, stored_version) {
        (true, Some(_)) => return Err(conflict()),
        (false, Some(version)) if version != changes.task.version => return Err(conflict()),
        (false, None) => return Err(DomainError::not_found("task", &changes.task.order_id)),
        _ => {}
    }

    let snapshot = state.snapshots.entry(changes.task.order_id.clone()).or_default();
    let mut task = changes.task.clone();
    task.version += 1;
    snapshot.task = Some(task);

    snapshot.tests.retain(|test| !changes.delete_test_ids.contains(&test.id));
    snapshot
        .test_metadata
        .retain(|meta| !changes.delete_test_ids.contains(&meta.test_details_id));
    snapshot
        .investigations
        .retain(|inv| !changes.delete_test_ids.contains(&inv.test_details_id));
    snapshot
        .rerun_results
        .retain(|rerun| !changes.delete_test_ids.contains(&rerun.test_details_id));
    for test in changes.create_tests.iter().chain(&changes.update_tests) {
        upsert_by(&mut snapshot.tests, test.clone(), |t| t.id);
    }
    for meta in &changes.upsert_test_metadata {
        upsert_by(&mut snapshot.test_metadata, meta.clone(), |m| m.test_details_id);
    }
    for investigation in changes
        .create_investigations
        .iter()
        .chain(&changes.update_investigations)
    {
        upsert_by(&mut snapshot.investigations, investigation.clone(), |i| i.id);
    }
    for rerun in &changes.upsert_rerun_results {
        upsert_by(&mut snapshot.rerun_results, rerun.clone(), |r| r.id);
    }
    for remark in &changes.upsert_remarks {
        upsert_by(&mut state.remarks, remark.clone(), |r| {
            (r.investigation_result_id, r.remark_type)
        });
    }
    Ok(())
}

#[async_trait]
impl OrderLookup for InMemoryReconciliationRepository {
    async fn find_by_visit(&self, visit_id: &str) -> DomainResult<Option<OrderContext>> {
        let state = self.state.lock().await;
        Ok(state.orders.values().find_map(|record| {
            record
                .visits
                .iter()
                .find(|visit| visit.visit_id == visit_id)
                .map(|visit| record.context(visit_id, visit.lab_id))
        }))
    }

    async fn find_by_order(&self, order_id: &str) -> DomainResult<Option<OrderRecord>> {
        Ok(self.state.lock().await.orders.get(order_id).cloned())
    }

    async fn pathologists(&self) -> DomainResult<Vec<Pathologist>> {
        Ok(self.state.lock().await.pathologists.clone())
    }
}

#[async_trait]
impl ReconciliationRepository for InMemoryReconciliationRepository {
    async fn load_snapshot(&self, order_id: &str) -> DomainResult<TaskSnapshot> {
        Ok(self
            .state
            .lock()
            .await
            .snapshots
            .get(order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply(&self, changes: &ChangeSet) -> DomainResult<()> {
        self.take_injected_failure()?;
        write_changes(&mut *self.state.lock().await, changes)
    }

    async fn apply_order(&self, record: &OrderRecord, changes: Option<&ChangeSet>) -> DomainResult<()> {
        self.take_injected_failure()?;
        let mut state = self.state.lock().await;
        if let Some(changes) = changes {
            write_changes(&mut state, changes)?;
        }
        state.orders.insert(record.order.order_id.clone(), record.clone());
        Ok(())
    }

    async fn set_report_status(&self, test_ids: &[Uuid], status: ReportStatus) -> DomainResult<()> {
        let mut state = self.state.lock().await;
        for test in state
            .snapshots
            .values_mut()
            .flat_map(|snapshot| snapshot.tests.iter_mut())
            .filter(|test| test_ids.contains(&test.id))
        {
            test.report_status = status;
        }
        Ok(())
    }
}
