//! Remote dashboard API client
//!
//! The backing CRUD service is a black box to the sync layer; this module
//! defines the seam (`RemoteApi`) and a JSON-over-HTTP implementation.
//! Server responses are authoritative for `id`, `version` and
//! `updated_at`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::RemoteError;
use crate::types::{CreateDashboardInput, Dashboard, DashboardPatch};

/// Result type for remote calls; the error distinguishes transport
/// failures (retryable offline) from server rejections (final).
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The remote dashboard CRUD surface consumed by the sync layer
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch_dashboard(&self, id: &str) -> RemoteResult<Dashboard>;
    async fn create_dashboard(&self, input: &CreateDashboardInput) -> RemoteResult<Dashboard>;
    async fn update_dashboard(&self, id: &str, patch: &DashboardPatch) -> RemoteResult<Dashboard>;
    async fn delete_dashboard(&self, id: &str) -> RemoteResult<()>;
    async fn list_dashboards(&self) -> RemoteResult<Vec<Dashboard>>;
}

/// JSON REST client for the dashboard service
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Remote client built without its timeout: {}", e);
                reqwest::Client::default()
            });
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/dashboards{}", self.base_url, path)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> RemoteResult<T> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn fetch_dashboard(&self, id: &str) -> RemoteResult<Dashboard> {
        let resp = self.client.get(self.url(&format!("/{}", id))).send().await?;
        Self::decode(resp).await
    }

    async fn create_dashboard(&self, input: &CreateDashboardInput) -> RemoteResult<Dashboard> {
        let resp = self.client.post(self.url("")).json(input).send().await?;
        Self::decode(resp).await
    }

    async fn update_dashboard(&self, id: &str, patch: &DashboardPatch) -> RemoteResult<Dashboard> {
        let resp = self
            .client
            .patch(self.url(&format!("/{}", id)))
            .json(patch)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn delete_dashboard(&self, id: &str) -> RemoteResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/{}", id)))
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::Rejected {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            })
        }
    }

    async fn list_dashboards(&self) -> RemoteResult<Vec<Dashboard>> {
        let resp = self.client.get(self.url("")).send().await?;
        Self::decode(resp).await
    }
}
