//! LIS refetch client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

use super::JsonClient;
use crate::domain::errors::DomainResult;
use crate::domain::models::LisVisitPayload;
use crate::domain::ports::LisSourceClient;

/// LIS refetch API over HTTP.
pub struct HttpLisClient {
    http: JsonClient,
}

impl HttpLisClient {
    /// Client for `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> DomainResult<Self> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout)?,
        })
    }
}

#[derive(Serialize)]
struct RefetchRequest<'a> {
    report_format: &'a str,
}

#[async_trait]
impl LisSourceClient for HttpLisClient {
    #[instrument(skip(self))]
    async fn fetch_visit(&self, visit_id: &str, report_format: &str) -> DomainResult<LisVisitPayload> {
        self.http
            .post(&format!("/visits/{visit_id}/refetch"), &RefetchRequest { report_format })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use crate::domain::models::{LisNode, STATIONERY_PDF};

    #[tokio::test]
    async fn test_refetch_decodes_visit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/visits/V9/refetch")
            .match_body(mockito::Matcher::Json(serde_json::json!({"report_format": "StationeryPDF"})))
            .with_status(200)
            .with_body(
                r#"{"OrderId": "V9", "ResultAsPdf": "JVBERi0=", "OrderInfo": [
                    {"TestType": "INV", "TestCode": "GLU", "TestValue": "101", "TestStatus": "Completed"}]}"#,
            )
            .create_async()
            .await;

        let client = HttpLisClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let visit = client.fetch_visit("V9", STATIONERY_PDF).await.unwrap();

        mock.assert_async().await;
        assert_eq!(visit.result_as_pdf, "JVBERi0=");
        assert!(matches!(&visit.order_info[0], LisNode::Investigation(r) if r.test_value == "101"));
    }

    #[tokio::test]
    async fn test_unreachable_lis_is_transient() {
        let client = HttpLisClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = client.fetch_visit("V9", STATIONERY_PDF).await.unwrap_err();
        assert!(matches!(err, DomainError::Transient(_)));
        assert!(err.is_retryable());
    }
}
