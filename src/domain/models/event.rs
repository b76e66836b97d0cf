//! Inbound event envelopes and outbound test events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Kinds of inbound events this engine handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// LIS results for a visit.
    LisEvent,
    /// LIS rerun request for a visit.
    LisRerunEvent,
    /// OMS order created or updated.
    OmsOrderEvent,
    /// OMS removed one test from an order.
    OmsTestDeleteEvent,
}

impl EventType {
    /// Wire name carried in the envelope.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LisEvent => "lis_event",
            Self::LisRerunEvent => "lis_rerun_event",
            Self::OmsOrderEvent => "oms_order_event",
            Self::OmsTestDeleteEvent => "oms_test_delete_event",
        }
    }

    /// Parse a wire name; unknown names yield `None`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "lis_event" => Some(Self::LisEvent),
            "lis_rerun_event" => Some(Self::LisRerunEvent),
            "oms_order_event" => Some(Self::OmsOrderEvent),
            "oms_test_delete_event" => Some(Self::OmsTestDeleteEvent),
            _ => None,
        }
    }

    /// Whether the event originates from the order-management system.
    pub fn is_oms(&self) -> bool {
        matches!(self, Self::OmsOrderEvent | Self::OmsTestDeleteEvent)
    }

    /// Idempotency key guarding concurrent handling of one entity.
    ///
    /// LIS events lock a visit. Both OMS event types share one lock per order
    /// so a test deletion never interleaves with an order update.
    pub fn guard_key(&self, entity_id: &str) -> String {
        if self.is_oms() {
            format!("{}::order_id:{entity_id}", Self::OmsOrderEvent.as_str())
        } else {
            format!("{}::visit_id:{entity_id}", self.as_str())
        }
    }
}

/// Webhook body pushed by the LIS for one visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LisEvent {
    /// LIS visit id.
    pub entity_id: String,
    /// Base64 encoded visit payload.
    pub webhook_data: String,
}

/// Queue message wrapping an event, either inline or staged in the KV store.
///
/// The payload shape depends on `event_type` and is parsed only once the
/// type is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Wire name of the [`EventType`].
    pub event_type: String,
    /// Correlation id carried into logs.
    #[serde(default)]
    pub trace_id: String,
    /// Inline event body.
    #[serde(default)]
    pub payload: Option<Value>,
    /// KV key of a staged event body, used when `payload` is absent.
    #[serde(default)]
    pub cache_key: Option<String>,
    /// Queue ordering group.
    #[serde(default)]
    pub group_id: Option<String>,
}

impl EventEnvelope {
    /// Envelope carrying `payload` inline under a fresh trace id.
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            event_type: event_type.as_str().to_string(),
            trace_id: Uuid::new_v4().to_string(),
            payload: Some(payload),
            cache_key: None,
            group_id: None,
        }
    }

    /// Envelope carrying an LIS webhook body inline.
    pub fn inline(event_type: EventType, event: LisEvent) -> Self {
        Self::new(
            event_type,
            json!({"entity_id": event.entity_id, "webhook_data": event.webhook_data}),
        )
    }

    /// Envelope referring to a body staged under `cache_key`.
    pub fn staged(event_type: EventType, cache_key: String) -> Self {
        Self {
            payload: None,
            cache_key: Some(cache_key),
            ..Self::new(event_type, Value::Null)
        }
    }

    /// Key under which a large event body is staged.
    pub fn staging_key() -> String {
        format!("lis_event::staged:{}", Uuid::new_v4())
    }
}

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// The event was reconciled into the order's task.
    Processed {
        /// OMS order the event resolved to.
        order_id: String,
        /// Test details created.
        created: usize,
        /// Test details updated.
        updated: usize,
        /// Test details removed because the order no longer has them.
        deleted: usize,
        /// Tests sent back for rerun.
        rerun: usize,
    },
    /// Another worker holds the guard for this entity.
    DuplicateInProgress,
    /// The event was valid but carried nothing to do.
    Skipped { reason: String },
    /// The event was malformed and will not be retried.
    Dropped { reason: String },
}

impl ProcessOutcome {
    /// Shorthand for [`ProcessOutcome::Skipped`].
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped { reason: reason.into() }
    }

    /// Shorthand for [`ProcessOutcome::Dropped`].
    pub fn dropped(reason: impl Into<String>) -> Self {
        Self::Dropped { reason: reason.into() }
    }
}

/// Test-level milestone published downstream for TAT tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestEventKind {
    /// Approved.
    Approve,
    /// Completed, with or without approval.
    Completed,
    /// Sent back for a rerun.
    Rerun,
}

/// One test reaching a milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEvent {
    /// OMS order id.
    pub order_id: String,
    /// Engine-side test detail id.
    pub test_id: Uuid,
    /// OMS test id.
    pub central_test_id: String,
    /// Milestone reached.
    pub status: TestEventKind,
    /// When it was reached.
    pub occurred_at: DateTime<Utc>,
}
