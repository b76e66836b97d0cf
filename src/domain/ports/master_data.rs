//! Master-data service port.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::errors::DomainResult;
use crate::domain::models::{InvestigationDetails, MasterInvestigation};

/// Lookup parameters shared by master-data calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvestigationQuery {
    /// LIS codes to resolve.
    pub codes: Vec<String>,
    /// City whose reference data applies.
    pub city_code: String,
    /// Lab running the tests.
    pub lab_id: i64,
    /// Patient date of birth, if known.
    pub dob: Option<NaiveDate>,
    /// Patient gender.
    pub gender: String,
}

/// Port for the master-data service that owns investigation definitions,
/// reference ranges and RCV thresholds.
#[async_trait]
pub trait MasterDataClient: Send + Sync {
    /// Investigation definitions for the given LIS codes, with reference
    /// ranges resolved for the patient's age and gender.
    async fn get_investigation_details(
        &self,
        query: &InvestigationQuery,
    ) -> DomainResult<Vec<MasterInvestigation>>;

    /// Panel structure for the given test codes. Used to validate that a
    /// payload carries every parameter the panel defines.
    async fn get_panel_details(&self, query: &InvestigationQuery) -> DomainResult<InvestigationDetails>;
}
