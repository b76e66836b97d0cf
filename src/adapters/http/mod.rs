//! HTTP adapters for the external collaborators.
//!
//! Every client maps connection failures to `Transient`, non-2xx answers
//! to `ExternalService` and undecodable bodies to `SerializationError`.

pub mod disabled;
pub mod lis_client;
pub mod master_data_client;
pub mod notifier;
pub mod publisher;

pub use disabled::Disabled;
pub use lis_client::HttpLisClient;
pub use master_data_client::HttpMasterDataClient;
pub use notifier::WebhookNotifier;
pub use publisher::HttpEventPublisher;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::errors::{DomainError, DomainResult};

/// JSON-over-HTTP plumbing shared by the clients.
#[derive(Debug, Clone)]
pub struct JsonClient {
    base_url: String,
    client: reqwest::Client,
}

impl JsonClient {
    /// Client for `base_url`. Fails on an unparsable URL.
    pub fn new(base_url: &str, timeout: Duration) -> DomainResult<Self> {
        reqwest::Url::parse(base_url)
            .map_err(|e| DomainError::Configuration(format!("invalid base URL '{base_url}': {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Absolute URL of `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST `body` and decode the JSON answer.
    pub async fn post<B, R>(&self, path: &str, body: &B) -> DomainResult<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(path, body).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DomainError::Transient(format!("failed to read response from {path}: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DomainError::SerializationError(format!("invalid response from {path}: {e}")))
    }

    /// POST `body`, ignoring any answer body.
    pub async fn post_unit<B>(&self, path: &str, body: &B) -> DomainResult<()>
    where
        B: Serialize + Sync + ?Sized,
    {
        self.send(path, body).await.map(|_| ())
    }

    async fn send<B>(&self, path: &str, body: &B) -> DomainResult<reqwest::Response>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| DomainError::Transient(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            return Err(DomainError::ExternalService(format!("{url} returned {status}: {body}")));
        }
        Ok(response)
    }
}
