//! Master-data service client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::instrument;

use super::JsonClient;
use crate::domain::errors::DomainResult;
use crate::domain::models::{InvestigationDetails, MasterInvestigation, MasterPanel};
use crate::domain::ports::{InvestigationQuery, MasterDataClient};

/// Master-data service over HTTP.
pub struct HttpMasterDataClient {
    http: JsonClient,
}

impl HttpMasterDataClient {
    /// Client for `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> DomainResult<Self> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout)?,
        })
    }
}

#[derive(Serialize)]
struct InvestigationRequest<'a> {
    codes: &'a [String],
    city: &'a str,
    lab_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    dob: Option<NaiveDate>,
    gender: &'a str,
}

#[derive(Serialize)]
struct PanelRequest<'a> {
    codes: &'a [String],
    city: &'a str,
    lab_id: i64,
}

#[async_trait]
impl MasterDataClient for HttpMasterDataClient {
    #[instrument(skip(self, query), fields(codes = query.codes.len(), lab_id = query.lab_id))]
    async fn get_investigation_details(
        &self,
        query: &InvestigationQuery,
    ) -> DomainResult<Vec<MasterInvestigation>> {
        let body = InvestigationRequest {
            codes: &query.codes,
            city: &query.city_code,
            lab_id: query.lab_id,
            dob: query.dob,
            gender: &query.gender,
        };
        self.http.post("/investigations", &body).await
    }

    #[instrument(skip(self, query), fields(codes = query.codes.len(), lab_id = query.lab_id))]
    async fn get_panel_details(&self, query: &InvestigationQuery) -> DomainResult<InvestigationDetails> {
        let body = PanelRequest {
            codes: &query.codes,
            city: &query.city_code,
            lab_id: query.lab_id,
        };
        let panels: Vec<MasterPanel> = self.http.post("/panels", &body).await?;
        Ok(InvestigationDetails {
            investigations: Vec::new(),
            panels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use mockito::Matcher;

    fn query() -> InvestigationQuery {
        InvestigationQuery {
            codes: vec!["GLU".into()],
            city_code: "BLR".into(),
            lab_id: 3,
            dob: NaiveDate::from_ymd_opt(1990, 1, 1),
            gender: "F".into(),
        }
    }

    #[tokio::test]
    async fn test_investigations_request_and_decode() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/investigations")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "codes": ["GLU"], "city": "BLR", "lab_id": 3, "dob": "1990-01-01", "gender": "F"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"investigation_id": 11, "lis_code": "GLU", "rcv_positive": 12.5}]"#)
            .create_async()
            .await;

        let client = HttpMasterDataClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let investigations = client.get_investigation_details(&query()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(investigations.len(), 1);
        assert_eq!(investigations[0].investigation_id, 11);
    }

    #[tokio::test]
    async fn test_panels_wrap_into_details() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/panels")
            .with_status(200)
            .with_body(r#"[{"panel_test_code": "LFT", "investigations": [{"lis_code": "ALT"}]}]"#)
            .create_async()
            .await;

        let client = HttpMasterDataClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let details = client.get_panel_details(&query()).await.unwrap();
        assert_eq!(details.panels[0].panel_test_code, "LFT");
        assert_eq!(details.panels[0].investigations[0].lis_code, "ALT");
    }

    #[tokio::test]
    async fn test_error_status_and_bad_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/investigations")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;
        server
            .mock("POST", "/panels")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = HttpMasterDataClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        match client.get_investigation_details(&query()).await {
            Err(DomainError::ExternalService(message)) => assert!(message.contains("maintenance")),
            other => panic!("expected external service error, got {other:?}"),
        }
        assert!(matches!(
            client.get_panel_details(&query()).await,
            Err(DomainError::SerializationError(_))
        ));
    }
}
