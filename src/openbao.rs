use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CallError, ShareRejected};
use crate::replica::{
    InitReply, ReplicaClient, ReplicaRef, is_already_initialized, is_already_member,
    is_share_rejected,
};
use crate::status::{HaMode, StatusReport, TriState};

/// HTTP client for the `sys/` API of one server.
#[derive(Debug, Clone)]
pub struct OpenBaoClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
pub struct SealStatus {
    #[serde(default)]
    pub initialized: Option<bool>,
    pub sealed: bool,
    #[serde(default)]
    pub t: Option<u32>,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub progress: Option<u32>,
}

impl From<SealStatus> for StatusReport {
    fn from(status: SealStatus) -> Self {
        Self {
            initialized: status
                .initialized
                .map_or(TriState::Unknown, TriState::from_bool),
            sealed: TriState::from_bool(status.sealed),
            ha_mode: HaMode::Unknown,
            threshold: status.t,
            shares: status.n,
            progress: status.progress,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LeaderStatus {
    #[serde(default)]
    pub ha_enabled: bool,
    #[serde(default)]
    pub is_self: bool,
}

#[derive(Deserialize, Clone)]
pub struct InitResponse {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub keys_base64: Vec<String>,
    #[serde(default)]
    pub root_token: String,
}

/// Failure body returned by the API.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OpenBao API error ({}): {}", self.status, self.body)
    }
}

impl std::error::Error for ApiError {}

impl OpenBaoClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OpenBao HTTP client")?;
        Ok(Self::with_client(client, base_url))
    }

    #[must_use]
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// # Errors
    /// Returns an error if the request fails or the reply cannot be parsed.
    pub async fn seal_status(&self) -> Result<SealStatus> {
        self.get_json("sys/seal-status").await
    }

    /// # Errors
    /// Returns an error if the request fails or the reply cannot be parsed.
    pub async fn leader(&self) -> Result<LeaderStatus> {
        self.get_json("sys/leader").await
    }

    /// # Errors
    /// Returns an error if the request fails; API failures carry an [`ApiError`].
    pub async fn init(&self, shares: u8, threshold: u8) -> Result<InitResponse> {
        #[derive(Serialize)]
        struct InitRequest {
            secret_shares: u8,
            secret_threshold: u8,
        }
        self.post_json(
            "sys/init",
            &InitRequest {
                secret_shares: shares,
                secret_threshold: threshold,
            },
        )
        .await
    }

    /// # Errors
    /// Returns an error if the request fails or the reply cannot be parsed.
    pub async fn unseal(&self, key: &str) -> Result<SealStatus> {
        #[derive(Serialize)]
        struct UnsealRequest<'a> {
            key: &'a str,
        }
        self.post_json("sys/unseal", &UnsealRequest { key }).await
    }

    /// # Errors
    /// Returns an error if the request fails.
    pub async fn unseal_reset(&self) -> Result<SealStatus> {
        #[derive(Serialize)]
        struct ResetRequest {
            reset: bool,
        }
        self.post_json("sys/unseal", &ResetRequest { reset: true })
            .await
    }

    /// # Errors
    /// Returns an error if the request fails; API failures carry an [`ApiError`].
    pub async fn raft_join(&self, leader_api_addr: &str) -> Result<()> {
        #[derive(Serialize)]
        struct JoinRequest<'a> {
            leader_api_addr: &'a str,
        }
        let _: serde_json::Value = self
            .post_json("sys/storage/raft/join", &JoinRequest { leader_api_addr })
            .await?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.endpoint(path))
            .send()
            .await
            .with_context(|| format!("OpenBao request failed: {path}"))?;
        Self::parse_response(response)
            .await
            .with_context(|| format!("OpenBao response parse failed: {path}"))
    }

    async fn post_json<T: Serialize, R: DeserializeOwned>(&self, path: &str, body: &T) -> Result<R> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("OpenBao request failed: {path}"))?;
        Self::parse_response(response)
            .await
            .with_context(|| format!("OpenBao response parse failed: {path}"))
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read OpenBao response body")?;
        if !status.is_success() {
            return Err(ApiError { status, body: text }.into());
        }
        let body = if text.trim().is_empty() { "null" } else { &text };
        serde_json::from_str(body).context("Failed to parse OpenBao response")
    }
}

/// Replica client that reaches every replica over its HTTP API.
#[derive(Debug, Clone)]
pub struct HttpReplicaClient {
    client: Client,
}

impl HttpReplicaClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OpenBao HTTP client")?;
        Ok(Self { client })
    }

    fn api(&self, replica: &ReplicaRef) -> OpenBaoClient {
        OpenBaoClient::with_client(self.client.clone(), &replica.address)
    }
}

impl ReplicaClient for HttpReplicaClient {
    async fn status(&self, replica: &ReplicaRef) -> Result<StatusReport> {
        let api = self.api(replica);
        let mut report: StatusReport = api.seal_status().await?.into();
        if report.sealed == TriState::False {
            // sys/leader is only served by unsealed nodes.
            if let Ok(leader) = api.leader().await
                && leader.ha_enabled
            {
                report.ha_mode = if leader.is_self {
                    HaMode::Active
                } else {
                    HaMode::Standby
                };
            }
        }
        Ok(report)
    }

    async fn initialize(
        &self,
        replica: &ReplicaRef,
        shares: u8,
        threshold: u8,
    ) -> Result<InitReply, CallError> {
        match self.api(replica).init(shares, threshold).await {
            Ok(response) => {
                let keys = if response.keys_base64.is_empty() {
                    response.keys
                } else {
                    response.keys_base64
                };
                Ok(InitReply {
                    root_token: response.root_token,
                    keys,
                })
            }
            Err(err) if api_body(&err).is_some_and(is_already_initialized) => {
                Err(CallError::AlreadyInitialized {
                    replica: replica.name.clone(),
                })
            }
            Err(err) if is_unparseable_body(&err) => Err(CallError::Reply(err)),
            Err(err) => Err(err.into()),
        }
    }

    async fn unseal(&self, replica: &ReplicaRef, share: &str) -> Result<StatusReport> {
        match self.api(replica).unseal(share).await {
            Ok(status) => Ok(status.into()),
            Err(err) => {
                let rejection = api_body(&err)
                    .filter(|body| is_share_rejected(body))
                    .map(|body| body.trim().to_string());
                match rejection {
                    Some(reason) => Err(ShareRejected {
                        replica: replica.name.clone(),
                        reason,
                    }
                    .into()),
                    None => Err(err),
                }
            }
        }
    }

    async fn reset_unseal(&self, replica: &ReplicaRef) -> Result<()> {
        self.api(replica).unseal_reset().await?;
        Ok(())
    }

    async fn raft_join(&self, replica: &ReplicaRef, leader_address: &str) -> Result<(), CallError> {
        match self.api(replica).raft_join(leader_address).await {
            Ok(()) => Ok(()),
            Err(err) if api_body(&err).is_some_and(is_already_member) => {
                Err(CallError::AlreadyMember {
                    replica: replica.name.clone(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// A 2xx reply whose body did not decode.
fn is_unparseable_body(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<serde_json::Error>())
}

fn api_body(err: &anyhow::Error) -> Option<&str> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ApiError>())
        .map(|api| api.body.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_status_into_report() {
        let report: StatusReport = SealStatus {
            initialized: Some(true),
            sealed: true,
            t: Some(3),
            n: Some(5),
            progress: Some(2),
        }
        .into();
        assert_eq!(report.initialized, TriState::True);
        assert_eq!(report.sealed, TriState::True);
        assert_eq!(report.progress, Some(2));
    }

    #[test]
    fn test_api_body_found_through_context() {
        let err = anyhow::Error::from(ApiError {
            status: StatusCode::BAD_REQUEST,
            body: r#"{"errors":["Vault is already initialized"]}"#.to_string(),
        })
        .context("OpenBao response parse failed: sys/init");
        assert!(api_body(&err).is_some_and(is_already_initialized));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = OpenBaoClient::new("http://openbao-0:8200/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint("sys/init"), "http://openbao-0:8200/v1/sys/init");
    }
}
