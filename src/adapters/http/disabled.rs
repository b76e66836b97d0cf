//! Stand-in for collaborators whose URL is not configured.
//!
//! Outbound sinks silently succeed; lookups fail as transient so the
//! engine degrades the same way it does when the service is down.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{InvestigationDetails, LisVisitPayload, MasterInvestigation, TestEvent};
use crate::domain::ports::{EventPublisher, InvestigationQuery, LisSourceClient, MasterDataClient, NotificationSink};

/// A collaborator whose URL is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

fn unconfigured(what: &str) -> DomainError {
    DomainError::Transient(format!("{what} is not configured"))
}

#[async_trait]
impl MasterDataClient for Disabled {
    async fn get_investigation_details(
        &self,
        _query: &InvestigationQuery,
    ) -> DomainResult<Vec<MasterInvestigation>> {
        Err(unconfigured("master data service"))
    }

    async fn get_panel_details(&self, _query: &InvestigationQuery) -> DomainResult<InvestigationDetails> {
        Err(unconfigured("master data service"))
    }
}

#[async_trait]
impl LisSourceClient for Disabled {
    async fn fetch_visit(&self, _visit_id: &str, _report_format: &str) -> DomainResult<LisVisitPayload> {
        Err(unconfigured("LIS refetch"))
    }
}

#[async_trait]
impl NotificationSink for Disabled {
    async fn send_alert(&self, channel: &str, message: &str) -> DomainResult<()> {
        debug!(channel, message, "alert dropped, no notification sink configured");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for Disabled {
    async fn publish(&self, event: &TestEvent) -> DomainResult<()> {
        debug!(order_id = %event.order_id, status = ?event.status, "test event dropped, no publisher configured");
        Ok(())
    }
}
