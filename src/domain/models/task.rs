//! Task domain model.
//!
//! A task is the pathologist's unit of work for one order. It is created the
//! first time an LIS event for the order is reconciled and is never deleted;
//! its status is derived from the tests it owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::TaskStatus;

/// A pathologist task for one order at one lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Row id.
    pub id: Uuid,
    /// OMS order id.
    pub order_id: String,
    /// Lab the task belongs to.
    pub lab_id: i64,
    /// Current status.
    pub status: TaskStatus,
    /// Status to return to when a completed task reopens.
    pub previous_status: Option<TaskStatus>,
    /// Earliest SLA deadline among tests awaiting a pathologist.
    pub doctor_tat: Option<DateTime<Utc>>,
    /// Any test of the task is critical.
    pub is_critical: bool,
    /// When the task last completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic lock counter, bumped on every write.
    pub version: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh pending task.
    pub fn new(order_id: impl Into<String>, lab_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.into(),
            lab_id,
            status: TaskStatus::Pending,
            previous_status: None,
            doctor_tat: None,
            is_critical: false,
            completed_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the task completed, remembering where it came from.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        if self.status != TaskStatus::Completed {
            self.previous_status = Some(self.status);
            self.status = TaskStatus::Completed;
        }
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Reopen a completed task into its remembered status.
    pub fn reopen(&mut self, now: DateTime<Utc>) {
        if self.status != TaskStatus::Completed {
            return;
        }
        self.status = match self.previous_status {
            Some(prev) if prev != TaskStatus::Completed => prev,
            _ => TaskStatus::Pending,
        };
        self.completed_at = None;
        self.updated_at = now;
    }

    /// Whether the task is completed.
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
