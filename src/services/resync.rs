//! Refetches a visit from the LIS until it agrees with master data.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{OrderContext, STATIONERY_PDF};
use crate::domain::ports::{InvestigationQuery, LisSourceClient, MasterDataClient, NotificationSink};
use crate::services::anomaly_detector::{AnomalyDetector, AnomalyReport, ReferenceIndex};
use crate::services::payload_normalizer::NormalizedPayload;
use crate::services::retry::RetryPolicy;

/// Result of validating (and possibly refetching) a payload.
#[derive(Debug)]
pub struct ResyncResult {
    /// Payload to reconcile, refetched if validation failed.
    pub payload: NormalizedPayload,
    /// Refetches performed.
    pub refetches: u32,
    /// Anomalies still present after the last refetch.
    pub unresolved: Option<AnomalyReport>,
}

impl ResyncResult {
    fn settled(payload: NormalizedPayload, refetches: u32) -> Self {
        Self {
            payload,
            refetches,
            unresolved: None,
        }
    }
}

/// Validates a payload and refetches the visit until it is clean or retries run out.
pub struct ResyncLoop {
    master_data: Arc<dyn MasterDataClient>,
    lis: Arc<dyn LisSourceClient>,
    notifier: Arc<dyn NotificationSink>,
    policy: RetryPolicy,
    skipped_codes: BTreeSet<String>,
    alert_channel: String,
}

impl ResyncLoop {
    /// Loop over the given collaborators. `skipped_codes` are never validated.
    pub fn new(
        master_data: Arc<dyn MasterDataClient>,
        lis: Arc<dyn LisSourceClient>,
        notifier: Arc<dyn NotificationSink>,
        policy: RetryPolicy,
        skipped_codes: BTreeSet<String>,
        alert_channel: impl Into<String>,
    ) -> Self {
        Self {
            master_data,
            lis,
            notifier,
            policy,
            skipped_codes,
            alert_channel: alert_channel.into(),
        }
    }

    async fn reference_for(
        &self,
        detector: &AnomalyDetector<'_>,
        payload: &NormalizedPayload,
        base_query: &InvestigationQuery,
    ) -> DomainResult<ReferenceIndex> {
        let query = InvestigationQuery {
            codes: detector.reference_codes(payload),
            ..base_query.clone()
        };
        let details = self.master_data.get_panel_details(&query).await?;
        Ok(ReferenceIndex::build(&details))
    }

    /// Validate `payload` against master data and refetch it while anomalies
    /// remain. Never fails: lookup or fetch errors end the loop with the best
    /// payload seen so far.
    pub async fn run(
        &self,
        context: &OrderContext,
        pathologist_lis_ids: &HashSet<i64>,
        payload: NormalizedPayload,
    ) -> ResyncResult {
        let ordered_codes: BTreeSet<String> = context.tests.iter().map(|t| t.test_code.clone()).collect();
        let detector = AnomalyDetector::new(&ordered_codes, &self.skipped_codes, pathologist_lis_ids);

        if detector.reference_codes(&payload).is_empty() {
            return ResyncResult::settled(payload, 0);
        }
        let Some(dob) = context.patient.effective_dob() else {
            info!(visit_id = %context.visit_id, "patient has no date of birth, skipping payload validation");
            return ResyncResult::settled(payload, 0);
        };
        let base_query = InvestigationQuery {
            codes: Vec::new(),
            city_code: context.order.city_code.clone(),
            lab_id: context.order.servicing_lab_id,
            dob: Some(dob),
            gender: context.patient.gender.clone(),
        };

        let reference = match self.reference_for(&detector, &payload, &base_query).await {
            Ok(reference) => reference,
            Err(e) => {
                warn!(visit_id = %context.visit_id, error = %e, "panel lookup failed, skipping payload validation");
                return ResyncResult::settled(payload, 0);
            }
        };
        let mut report = detector.detect(&payload, &reference);
        if report.is_clean() {
            return ResyncResult::settled(payload, 0);
        }
        info!(
            visit_id = %context.visit_id,
            missing_in_reference = ?report.missing_in_reference,
            missing_in_payload = ?report.missing_in_payload,
            blank_values = ?report.blank_values,
            incorrect_result_types = ?report.incorrect_result_types,
            missing_approver = ?report.missing_approver,
            "payload anomalies detected, resyncing from LIS"
        );

        let mut current = payload;
        let mut refetches = 0;
        for attempt in 0..self.policy.max_attempts() {
            let fetched = match self.lis.fetch_visit(&context.visit_id, STATIONERY_PDF).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(visit_id = %context.visit_id, attempt, error = %e, "visit refetch failed");
                    return ResyncResult::settled(current, refetches);
                }
            };
            refetches += 1;
            current = NormalizedPayload::new(context.visit_id.clone(), fetched);

            let reference = match self.reference_for(&detector, &current, &base_query).await {
                Ok(reference) => reference,
                Err(e) => {
                    warn!(visit_id = %context.visit_id, attempt, error = %e, "panel lookup failed during resync");
                    return ResyncResult::settled(current, refetches);
                }
            };
            report = detector.detect(&current, &reference);
            if report.is_clean() {
                info!(visit_id = %context.visit_id, refetches, "payload anomalies resolved");
                return ResyncResult::settled(current, refetches);
            }
            self.policy.pause_after(attempt).await;
        }

        self.send_alerts(context, &report).await;
        ResyncResult {
            payload: current,
            refetches,
            unresolved: Some(report),
        }
    }

    async fn send_alerts(&self, context: &OrderContext, report: &AnomalyReport) {
        warn!(visit_id = %context.visit_id, "payload anomalies persist after resync");
        for message in report.alert_messages(&context.visit_id, &context.order.order_id, &context.order.city_code) {
            if let Err(e) = self.notifier.send_alert(&self.alert_channel, &message).await {
                warn!(visit_id = %context.visit_id, error = %e, "failed to send anomaly alert");
            }
        }
    }
}
