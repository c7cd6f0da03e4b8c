//! HTTP client for the owners service.
//!
//! The service answers `GET {endpoint}/repos/{org}/{repo}/pulls/{n}/owners`
//! with the reviewer and committer rosters and the approval threshold.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mergegate_core::{CapabilityError, CapabilityResult, ChangeId, OwnersProvider, OwnersSnapshot};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::{error, info};

use crate::middleware::CORRELATION_ID_HEADER;

#[derive(Debug, Deserialize)]
struct OwnersResponse {
    #[serde(default)]
    data: Owners,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct Owners {
    #[serde(default, alias = "committers")]
    approvers: Vec<String>,
    #[serde(default)]
    reviewers: Vec<String>,
    #[serde(rename = "needsLGTM")]
    needs_lgtm: u32,
}

pub struct HttpOwnersClient {
    client: ClientWithMiddleware,
    endpoint: String,
    correlation_id: Option<String>,
}

impl HttpOwnersClient {
    pub fn new(
        client: ClientWithMiddleware,
        endpoint: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            correlation_id,
        }
    }

    pub fn owners_url(&self, change: &ChangeId) -> String {
        format!(
            "{}/repos/{}/{}/pulls/{}/owners",
            self.endpoint.trim_end_matches('/'),
            change.org,
            change.repo,
            change.number
        )
    }

    pub async fn fetch(&self, change: &ChangeId) -> Result<OwnersSnapshot> {
        if self.endpoint.trim().is_empty() {
            return Err(anyhow!("no owners endpoint configured for {}", change));
        }

        let url = self.owners_url(change);
        info!("Loading owners for {} from {}", change, url);

        let mut request = self.client.get(&url).header("Accept", "application/json");
        if let Some(cid) = &self.correlation_id {
            request = request.header(CORRELATION_ID_HEADER, cid.as_str());
        }
        let response = request
            .send()
            .await
            .context("Failed to send owners request")?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("Owners service error for {}: {} - {}", change, status, error_text);
            return Err(anyhow!("owners service returned {}: {}", status, error_text));
        }

        let body: OwnersResponse = response
            .json()
            .await
            .context("Failed to parse owners response")?;
        if !body.message.is_empty() {
            info!("Owners service message for {}: {}", change, body.message);
        }

        if body.data.needs_lgtm == 0 {
            error!("Owners service for {} reported needsLGTM of 0", change);
            return Err(anyhow!("owners service returned needsLGTM of 0 for {}", change));
        }

        Ok(OwnersSnapshot::new(
            body.data.reviewers,
            body.data.approvers,
            body.data.needs_lgtm,
        ))
    }
}

#[async_trait]
impl OwnersProvider for HttpOwnersClient {
    async fn load_owners(&self, change: &ChangeId) -> CapabilityResult<OwnersSnapshot> {
        self.fetch(change)
            .await
            .map_err(|e| CapabilityError::new(format!("{:#}", e)))
    }
}
