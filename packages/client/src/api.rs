use async_trait::async_trait;
use common::{BatchRequest, BatchResponse, DeviceBlobStatus, WriteChange};
use tracing::instrument;

use crate::buffer::BatchTransport;
use crate::error::ApiError;

/// HTTP client for the sync server, authenticated as one principal.
pub struct SyncApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl SyncApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.into(),
        }
    }

    /// Submit one batch of changes to the apply engine.
    #[instrument(skip(self, changes), fields(changes = changes.len()))]
    pub async fn submit(&self, changes: &[WriteChange]) -> Result<BatchResponse, ApiError> {
        let url = format!("{}/api/v1/sync/batch", self.base_url);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&BatchRequest {
                changes: changes.to_vec(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<BatchResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Coordination read: presence of every known blob relative to one
    /// device.
    #[instrument(skip(self))]
    pub async fn device_blobs(&self, device_id: &str) -> Result<Vec<DeviceBlobStatus>, ApiError> {
        let url = format!("{}/api/v1/sync/devices/{device_id}/blobs", self.base_url);
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Vec<DeviceBlobStatus>>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BatchTransport for SyncApi {
    async fn submit_batch(&self, changes: &[WriteChange]) -> Result<BatchResponse, ApiError> {
        self.submit(changes).await
    }
}
