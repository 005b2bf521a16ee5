//! Delegation of probes to a remote check location.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ProbeError, ProbeStatus};

/// Error text recorded when a remote check location cannot be used.
pub const REMOTE_CHECK_FAILED: &str = "remote check failed";

const REMOTE_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Request body sent to a remote check location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCheckRequest {
    pub target: String,
}

/// Response body returned by a remote check location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCheckResponse {
    pub location: String,
    pub status: ProbeStatus,
}

/// Client side of the remote check protocol.
#[derive(Clone)]
pub struct RemoteChecker {
    client: reqwest::Client,
}

impl RemoteChecker {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(REMOTE_CHECK_TIMEOUT)
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;
        Ok(Self { client })
    }

    /// Ask `endpoint` to probe `target_id`.
    ///
    /// Never fails: any transport or protocol error becomes a down status
    /// attributed to `fallback_location`.
    pub async fn check(
        &self,
        endpoint: &str,
        target_id: &str,
        fallback_location: &str,
    ) -> (String, ProbeStatus) {
        match self.request(endpoint, target_id).await {
            Ok(resp) => (resp.location, resp.status),
            Err(e) => {
                tracing::warn!("Remote check of {} via {} failed: {}", target_id, endpoint, e);
                (
                    fallback_location.to_string(),
                    ProbeStatus::down(0, REMOTE_CHECK_FAILED),
                )
            }
        }
    }

    async fn request(
        &self,
        endpoint: &str,
        target_id: &str,
    ) -> Result<RemoteCheckResponse, ProbeError> {
        let response = self
            .client
            .post(endpoint)
            .json(&RemoteCheckRequest {
                target: target_id.to_string(),
            })
            .send()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        response
            .json::<RemoteCheckResponse>()
            .await
            .map_err(|e| ProbeError::Network(format!("malformed response: {}", e)))
    }
}
