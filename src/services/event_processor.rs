//! Entry point for inbound LIS and OMS events.
//!
//! Resolves the envelope, serialises handling per visit (LIS) or per order
//! (OMS) through the idempotency guard, and drives normalisation, resync,
//! approval and reconciliation. Side effects after the commit (test events,
//! alerts, reports) are best effort.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AlertConfig, ApprovalConfig, Config, EventEnvelope, EventType, FailureReason, LisBucket, LisEvent,
    LisVisitPayload, MasterInvestigation, OmsOrderEvent, OmsTestDeleteEvent, OrderContext, OrderRecord,
    ProcessOutcome, TestEvent, TestEventKind,
};
use crate::domain::ports::{
    ChangeSet, EventPublisher, HistoricalValueLookup, InvestigationQuery, KeyValueStore, LisSourceClient,
    MasterDataClient, NotificationSink, OrderLookup, PastValue, ReconciliationRepository, ReportStore,
};
use crate::services::auto_approval::ApprovalRules;
use crate::services::idempotency_guard::IdempotencyGuard;
use crate::services::payload_normalizer::{FlatInvestigations, NormalizedPayload};
use crate::services::reconciler::Reconciler;
use crate::services::report_worker::{ReportJob, ReportWorker};
use crate::services::rerun_handler::{plan_rerun_event, QcFailures, RerunAuditor};
use crate::services::result_builder::{BuiltTest, ResultBuilder};
use crate::services::resync::ResyncLoop;
use crate::services::retry::RetryPolicy;

/// Outbound collaborators of the event processor.
///
/// `orders` and `repository` usually share one database.
pub struct Ports {
    /// Guard keys and staged payloads.
    pub kv: Arc<dyn KeyValueStore>,
    /// Order-side tables.
    pub orders: Arc<dyn OrderLookup>,
    /// Master-data service.
    pub master_data: Arc<dyn MasterDataClient>,
    /// Past approved values.
    pub history: Arc<dyn HistoricalValueLookup>,
    /// LIS refetches.
    pub lis: Arc<dyn LisSourceClient>,
    /// Task persistence.
    pub repository: Arc<dyn ReconciliationRepository>,
    /// Operations alerts.
    pub notifier: Arc<dyn NotificationSink>,
    /// Downstream milestones.
    pub publisher: Arc<dyn EventPublisher>,
    /// Report files.
    pub reports: Arc<dyn ReportStore>,
}

/// Handles one event envelope end to end.
pub struct EventProcessor {
    kv: Arc<dyn KeyValueStore>,
    orders: Arc<dyn OrderLookup>,
    master_data: Arc<dyn MasterDataClient>,
    history: Arc<dyn HistoricalValueLookup>,
    repository: Arc<dyn ReconciliationRepository>,
    notifier: Arc<dyn NotificationSink>,
    publisher: Arc<dyn EventPublisher>,
    guard: IdempotencyGuard,
    resync: ResyncLoop,
    reports: ReportWorker,
    approval: ApprovalConfig,
    rules: ApprovalRules,
    alerts: AlertConfig,
}

/// Pathologists known to the LIS, by LIS user id.
struct Pathologists {
    oms_users: HashMap<i64, i64>,
    lis_ids: HashSet<i64>,
}

/// An envelope body parsed according to its event type.
enum InboundEvent {
    Lis { event_type: EventType, event: LisEvent },
    Order(OrderRecord),
    TestDelete(OmsTestDeleteEvent),
}

impl InboundEvent {
    fn parse(event_type: EventType, body: serde_json::Value) -> DomainResult<Self> {
        let malformed = |e: serde_json::Error| {
            DomainError::ValidationFailed(format!("malformed {} payload: {e}", event_type.as_str()))
        };
        match event_type {
            EventType::LisEvent | EventType::LisRerunEvent => {
                let event: LisEvent = serde_json::from_value(body).map_err(malformed)?;
                if event.entity_id.trim().is_empty() {
                    return Err(DomainError::ValidationFailed("event has no visit id".to_string()));
                }
                Ok(Self::Lis { event_type, event })
            }
            EventType::OmsOrderEvent => {
                let event: OmsOrderEvent = serde_json::from_value(body).map_err(malformed)?;
                Ok(Self::Order(event.into_record()?))
            }
            EventType::OmsTestDeleteEvent => {
                let event: OmsTestDeleteEvent = serde_json::from_value(body).map_err(malformed)?;
                event.validate()?;
                Ok(Self::TestDelete(event))
            }
        }
    }

    /// Visit id for LIS events, order id for OMS events.
    fn entity_id(&self) -> &str {
        match self {
            Self::Lis { event, .. } => &event.entity_id,
            Self::Order(record) => &record.order.order_id,
            Self::TestDelete(event) => &event.order_id,
        }
    }
}

impl EventProcessor {
    /// Processor over `ports`, configured from `config`.
    pub fn new(ports: Ports, config: &Config) -> Self {
        let resync = ResyncLoop::new(
            Arc::clone(&ports.master_data),
            Arc::clone(&ports.lis),
            Arc::clone(&ports.notifier),
            RetryPolicy::anomaly_resync(&config.retry),
            config.approval.skipped_retry_test_codes.clone(),
            config.alerts.missing_parameters_channel.clone(),
        );
        let reports = ReportWorker::new(
            Arc::clone(&ports.lis),
            ports.reports,
            Arc::clone(&ports.repository),
            RetryPolicy::missing_report(&config.retry),
            config.worker.report_concurrency,
        );
        Self {
            guard: IdempotencyGuard::new(
                Arc::clone(&ports.kv),
                Duration::from_secs(config.guard.dedup_ttl_secs),
            ),
            kv: ports.kv,
            orders: ports.orders,
            master_data: ports.master_data,
            history: ports.history,
            repository: ports.repository,
            notifier: ports.notifier,
            publisher: ports.publisher,
            resync,
            reports,
            rules: ApprovalRules::from(&config.approval),
            approval: config.approval.clone(),
            alerts: config.alerts.clone(),
        }
    }

    /// Handle one envelope.
    ///
    /// Malformed events come back as [`ProcessOutcome::Dropped`] rather than
    /// an error; `Err` means the event should be redelivered.
    #[instrument(skip(self, envelope), fields(trace_id = %envelope.trace_id, event_type = %envelope.event_type))]
    pub async fn process(&self, envelope: EventEnvelope) -> DomainResult<ProcessOutcome> {
        let Some(event_type) = EventType::from_str(&envelope.event_type) else {
            warn!("dropping event of unknown type");
            return Ok(ProcessOutcome::dropped(format!(
                "unknown event type '{}'",
                envelope.event_type
            )));
        };
        let event = match self.resolve_event(event_type, &envelope).await {
            Ok(event) => event,
            Err(DomainError::ValidationFailed(reason)) => {
                warn!(%reason, "dropping malformed event");
                return Ok(ProcessOutcome::dropped(reason));
            }
            Err(e) => return Err(e),
        };

        let key = event_type.guard_key(event.entity_id());
        match self.guard.run_exclusive(&key, || self.handle(&event)).await {
            Some(Ok(ProcessOutcome::Dropped { reason })) => {
                warn!(entity_id = %event.entity_id(), %reason, "dropping event");
                Ok(ProcessOutcome::Dropped { reason })
            }
            Some(result) => result,
            None => Ok(ProcessOutcome::DuplicateInProgress),
        }
    }

    /// Wait for background report jobs queued so far.
    pub async fn drain_reports(&self) {
        self.reports.drain().await;
    }

    /// Stage a large event body in the KV store and return an envelope that
    /// refers to it.
    pub async fn stage(
        &self,
        event_type: EventType,
        body: &serde_json::Value,
        ttl: Duration,
    ) -> DomainResult<EventEnvelope> {
        let key = EventEnvelope::staging_key();
        self.kv.set(&key, &body.to_string(), ttl).await?;
        Ok(EventEnvelope::staged(event_type, key))
    }

    /// Inline payload, or the staged one which is consumed on read.
    async fn resolve_event(&self, event_type: EventType, envelope: &EventEnvelope) -> DomainResult<InboundEvent> {
        let body = match (&envelope.payload, &envelope.cache_key) {
            (Some(body), _) => body.clone(),
            (None, Some(key)) => {
                let staged = self
                    .kv
                    .get(key)
                    .await?
                    .ok_or_else(|| DomainError::ValidationFailed(format!("staged payload '{key}' not found")))?;
                if let Err(e) = self.kv.delete(key).await {
                    warn!(key = %key, error = %e, "failed to delete staged payload");
                }
                serde_json::from_str(&staged)
                    .map_err(|e| DomainError::ValidationFailed(format!("staged payload is not JSON: {e}")))?
            }
            (None, None) => {
                return Err(DomainError::ValidationFailed(
                    "event carries neither payload nor cache key".to_string(),
                ))
            }
        };
        InboundEvent::parse(event_type, body)
    }

    async fn handle(&self, event: &InboundEvent) -> DomainResult<ProcessOutcome> {
        match event {
            InboundEvent::Lis { event_type, event } => self.handle_lis(*event_type, event).await,
            InboundEvent::Order(record) => self.handle_order(record).await,
            InboundEvent::TestDelete(event) => self.handle_test_delete(event).await,
        }
    }

    async fn handle_lis(&self, event_type: EventType, event: &LisEvent) -> DomainResult<ProcessOutcome> {
        let payload = match LisVisitPayload::from_base64(&event.webhook_data) {
            Ok(payload) => payload,
            Err(DomainError::ValidationFailed(reason) | DomainError::SerializationError(reason)) => {
                return Ok(ProcessOutcome::dropped(reason))
            }
            Err(e) => return Err(e),
        };
        if payload.is_non_stationery() {
            info!(visit_id = %event.entity_id, "skipping non-stationery report event");
            return Ok(ProcessOutcome::skipped("non-stationery report format"));
        }
        let Some(context) = self.orders.find_by_visit(&event.entity_id).await? else {
            return Ok(ProcessOutcome::dropped(format!(
                "no order found for visit '{}'",
                event.entity_id
            )));
        };
        let payload = NormalizedPayload::new(context.visit_id.clone(), payload);

        match event_type {
            EventType::LisRerunEvent => self.handle_rerun(&context, &payload).await,
            _ => self.handle_results(&context, payload).await,
        }
    }

    /// Store the order as the OMS now describes it and, once a task exists,
    /// bring the task's tests in line with it.
    async fn handle_order(&self, record: &OrderRecord) -> DomainResult<ProcessOutcome> {
        let order_id = &record.order.order_id;
        let snapshot = self.repository.load_snapshot(order_id).await?;
        let reconciliation = match &snapshot.task {
            Some(task) => {
                let visit_id = record
                    .visit_at(task.lab_id)
                    .map(|visit| visit.visit_id.as_str())
                    .unwrap_or_default();
                let context = record.context(visit_id, task.lab_id);
                let auditor = RerunAuditor::new(
                    &snapshot.rerun_results,
                    self.approval.auto_approval_user_id(&record.order.city_code).to_string(),
                );
                Some(
                    Reconciler {
                        context: &context,
                        snapshot: &snapshot,
                        built: &[],
                        qc: &QcFailures::default(),
                        auditor: &auditor,
                        now: Utc::now(),
                    }
                    .reconcile(),
                )
            }
            None => None,
        };

        let result = self
            .repository
            .apply_order(record, reconciliation.as_ref().map(|r| &r.changes))
            .await;
        self.alert_on_failure(&format!("order {order_id}"), result).await?;

        let Some(reconciliation) = reconciliation else {
            info!(order_id = %order_id, tests = record.tests.len(), "OMS order stored before any task");
            return Ok(ProcessOutcome::Processed {
                order_id: order_id.clone(),
                created: 0,
                updated: 0,
                deleted: 0,
                rerun: 0,
            });
        };
        info!(
            order_id = %order_id,
            created = reconciliation.created(),
            updated = reconciliation.updated(),
            deleted = reconciliation.deleted(),
            task_status = reconciliation.changes.task.status.as_str(),
            "OMS order reconciled"
        );
        Ok(ProcessOutcome::Processed {
            order_id: order_id.clone(),
            created: reconciliation.created(),
            updated: reconciliation.updated(),
            deleted: reconciliation.deleted(),
            rerun: 0,
        })
    }

    async fn handle_test_delete(&self, event: &OmsTestDeleteEvent) -> DomainResult<ProcessOutcome> {
        let Some(mut record) = self.orders.find_by_order(&event.order_id).await? else {
            return Ok(ProcessOutcome::dropped(format!(
                "no order found for '{}'",
                event.order_id
            )));
        };
        if record.remove_test(&event.central_test_id).is_none() {
            return Ok(ProcessOutcome::skipped(format!(
                "test '{}' is not on order '{}'",
                event.central_test_id, event.order_id
            )));
        }
        self.handle_order(&record).await
    }

    async fn handle_results(
        &self,
        context: &OrderContext,
        payload: NormalizedPayload,
    ) -> DomainResult<ProcessOutcome> {
        let pathologists = self.pathologists().await;
        let payload = self.resync.run(context, &pathologists.lis_ids, payload).await.payload;
        if !payload.has_bucket(&LisBucket::Completed) && !payload.has_bucket(&LisBucket::Approve) {
            return Ok(ProcessOutcome::skipped("no completed or approved results"));
        }

        let result_buckets = [LisBucket::Completed, LisBucket::Approve];
        let masters = self.master_investigations(context, &payload, &result_buckets).await;
        let past_values = self.past_values(context, &masters).await;
        let qc = QcFailures::detect(&payload, context.lab_id, &self.approval.qc_enabled_lab_ids);
        let auto_approver_id = self.approval.auto_approval_user_id(&context.order.city_code);
        let now = Utc::now();

        let builder = ResultBuilder {
            masters: &masters,
            past_values: &past_values,
            pathologist_users: &pathologists.oms_users,
            qc_failed_codes: &qc.codes,
            rules: &self.rules,
            auto_approver_id,
            doctor_tat_minutes: self.approval.doctor_tat_minutes,
            now,
        };
        let mut built: Vec<BuiltTest> = Vec::new();
        for bucket in &result_buckets {
            if let Some(entries) = payload.bucket(bucket) {
                built.extend(entries.iter().filter_map(|node| builder.build(node, bucket)));
            }
        }

        let snapshot = self.repository.load_snapshot(&context.order.order_id).await?;
        let auditor = RerunAuditor::new(&snapshot.rerun_results, auto_approver_id.to_string());
        let reconciliation = Reconciler {
            context,
            snapshot: &snapshot,
            built: &built,
            qc: &qc,
            auditor: &auditor,
            now,
        }
        .reconcile();
        self.commit(context, &reconciliation.changes).await?;

        self.publish(&reconciliation.test_events(now)).await;
        if payload.has_bucket(&LisBucket::Completed) {
            self.alert_auto_approval_failures(context, &built).await;
        }
        if let Some(approved) = payload.bucket(&LisBucket::Approve) {
            let test_ids = snapshot
                .tests
                .iter()
                .chain(&reconciliation.changes.create_tests)
                .filter(|test| approved.contains(&test.test_code))
                .map(|test| test.id)
                .collect();
            self.reports
                .submit(ReportJob {
                    order_id: context.order.order_id.clone(),
                    visit_id: context.visit_id.clone(),
                    test_ids,
                    pdf_base64: payload.report_pdf().to_string(),
                })
                .await;
        }

        info!(
            visit_id = %context.visit_id,
            order_id = %context.order.order_id,
            created = reconciliation.created(),
            updated = reconciliation.updated(),
            deleted = reconciliation.deleted(),
            qc_reruns = reconciliation.qc_rerun_tests,
            "LIS event reconciled"
        );
        Ok(ProcessOutcome::Processed {
            order_id: context.order.order_id.clone(),
            created: reconciliation.created(),
            updated: reconciliation.updated(),
            deleted: reconciliation.deleted(),
            rerun: reconciliation.qc_rerun_tests,
        })
    }

    async fn handle_rerun(
        &self,
        context: &OrderContext,
        payload: &NormalizedPayload,
    ) -> DomainResult<ProcessOutcome> {
        let Some(entries) = payload.bucket(&LisBucket::Rerun) else {
            return Ok(ProcessOutcome::skipped("no rerun entries"));
        };
        let snapshot = self.repository.load_snapshot(&context.order.order_id).await?;
        let now = Utc::now();
        let Some(plan) = plan_rerun_event(&snapshot, entries, &self.approval.lis_system_id, now) else {
            return Ok(ProcessOutcome::skipped("order has no task yet"));
        };
        self.commit(context, &plan.changes).await?;

        let events: Vec<TestEvent> = plan
            .rerun_tests
            .iter()
            .map(|test| TestEvent {
                order_id: test.order_id.clone(),
                test_id: test.id,
                central_test_id: test.central_test_id.clone(),
                status: TestEventKind::Rerun,
                occurred_at: now,
            })
            .collect();
        self.publish(&events).await;

        info!(
            visit_id = %context.visit_id,
            order_id = %context.order.order_id,
            reruns = plan.rerun_tests.len(),
            "LIS rerun event reconciled"
        );
        Ok(ProcessOutcome::Processed {
            order_id: context.order.order_id.clone(),
            created: 0,
            updated: plan.changes.update_tests.len(),
            deleted: 0,
            rerun: plan.rerun_tests.len(),
        })
    }

    async fn commit(&self, context: &OrderContext, changes: &ChangeSet) -> DomainResult<()> {
        let result = self.repository.apply(changes).await;
        let subject = format!("visit {} (order {})", context.visit_id, context.order.order_id);
        self.alert_on_failure(&subject, result).await
    }

    /// Pass `result` through, alerting operations when the transaction failed.
    async fn alert_on_failure(&self, subject: &str, result: DomainResult<()>) -> DomainResult<()> {
        if let Err(e) = result {
            error!(%subject, error = %e, "reconciliation transaction failed");
            let message = format!("Reconciliation failed for {subject}: {e}");
            if let Err(alert_error) = self.notifier.send_alert(&self.alerts.operations_channel, &message).await {
                warn!(error = %alert_error, "failed to send transaction failure alert");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn pathologists(&self) -> Pathologists {
        let pathologists = match self.orders.pathologists().await {
            Ok(pathologists) => pathologists,
            Err(e) => {
                warn!(error = %e, "pathologist lookup failed");
                Vec::new()
            }
        };
        Pathologists {
            oms_users: pathologists.iter().map(|p| (p.lis_user_id, p.user_id)).collect(),
            lis_ids: pathologists.iter().map(|p| p.lis_user_id).collect(),
        }
    }

    /// Master investigations for every leaf in `buckets`, keyed by LIS code.
    /// A failed lookup leaves every investigation unknown.
    async fn master_investigations(
        &self,
        context: &OrderContext,
        payload: &NormalizedPayload,
        buckets: &[LisBucket],
    ) -> HashMap<String, MasterInvestigation> {
        let flat = FlatInvestigations::from_nodes(
            buckets
                .iter()
                .filter_map(|bucket| payload.bucket(bucket))
                .flat_map(|entries| entries.iter()),
        );
        if flat.is_empty() {
            return HashMap::new();
        }
        let query = InvestigationQuery {
            codes: flat.codes().iter().map(|code| (*code).to_string()).collect(),
            city_code: context.order.city_code.clone(),
            lab_id: context.order.servicing_lab_id,
            dob: context.patient.effective_dob(),
            gender: context.patient.gender.clone(),
        };
        match self.master_data.get_investigation_details(&query).await {
            Ok(investigations) => investigations
                .into_iter()
                .map(|investigation| (investigation.lis_code.clone(), investigation))
                .collect(),
            Err(e) => {
                warn!(visit_id = %context.visit_id, error = %e, "master investigation lookup failed");
                HashMap::new()
            }
        }
    }

    async fn past_values(
        &self,
        context: &OrderContext,
        masters: &HashMap<String, MasterInvestigation>,
    ) -> HashMap<i64, PastValue> {
        let patient_id = context.order.patient_id.trim();
        let ids: Vec<i64> = masters
            .values()
            .map(|m| m.investigation_id)
            .filter(|id| *id != 0)
            .collect();
        if patient_id.is_empty() || ids.is_empty() {
            return HashMap::new();
        }
        match self.history.last_approved_values(patient_id, &ids).await {
            Ok(values) => values,
            Err(e) => {
                warn!(visit_id = %context.visit_id, error = %e, "past value lookup failed");
                HashMap::new()
            }
        }
    }

    async fn publish(&self, events: &[TestEvent]) {
        for event in events {
            if let Err(e) = self.publisher.publish(event).await {
                warn!(test_id = %event.test_id, error = %e, "failed to publish test event");
            }
        }
    }

    async fn alert_auto_approval_failures(&self, context: &OrderContext, built: &[BuiltTest]) {
        if !self.approval.enable_failure_alerts {
            return;
        }
        let mut by_reason: BTreeMap<FailureReason, Vec<&str>> = BTreeMap::new();
        for test in built {
            for (_, reason) in test.failures() {
                if matches!(reason, FailureReason::PastRecord | FailureReason::RefRange) {
                    let codes = by_reason.entry(reason).or_default();
                    if !codes.contains(&test.test_code.as_str()) {
                        codes.push(&test.test_code);
                    }
                }
            }
        }
        for (reason, codes) in by_reason {
            let message = format!(
                "Auto-approval failed ({}) for visit {} (order {}, city {}): {}",
                reason.as_str(),
                context.visit_id,
                context.order.order_id,
                context.order.city_code,
                codes.join(", ")
            );
            if let Err(e) = self
                .notifier
                .send_alert(&self.alerts.auto_approval_channel, &message)
                .await
            {
                warn!(error = %e, "failed to send auto-approval alert");
            }
        }
    }
}
