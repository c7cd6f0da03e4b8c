use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{StatusCode, Url};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{OnceCell, RwLock};
use tracing::{error, info, warn};

use crate::middleware::{create_http_client, CORRELATION_ID_HEADER};

const PER_PAGE: usize = 100;

#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    api_url: String,
    app_id: u64,
    private_key: String,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
    bot_login: Arc<OnceCell<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestInfo {
    pub installation_id: u64,
    pub repo_owner: String,
    pub repo_name: String,
    pub pr_number: u64,
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct AddLabelsRequest<'a> {
    labels: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    #[serde(default)]
    pub body: String,
    /// `null` for comments by deleted accounts.
    pub user: Option<GitHubUser>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestCommit {
    pub sha: String,
    /// The GitHub account linked to the git committer, if any.
    pub committer: Option<GitHubUser>,
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct AppInfoResponse {
    slug: String,
}

impl GitHubClient {
    pub fn new(app_id: u64, private_key: String, api_url: impl Into<String>) -> Self {
        Self {
            client: create_http_client(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            app_id,
            private_key,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
            bot_login: Arc::new(OnceCell::new()),
        }
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,
            exp: now + 600,
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse private key")?;

        encode(&header, &claims, &encoding_key).context("Failed to encode JWT")
    }

    async fn get_installation_token(&self, installation_id: u64) -> Result<String> {
        // Reuse a cached token with more than five minutes left.
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.get(&installation_id) {
                if expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default()
                    .as_secs()
                    > 300
                {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, installation_id
        );

        info!("Requesting new installation access token");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send installation token request")?;
        let response = check_status(response, "requesting an installation token").await?;

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("Failed to parse installation token response")?;

        let expires_at = DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("Failed to parse token expiration")?
            .with_timezone(&Utc);
        let expires_at_system =
            UNIX_EPOCH + std::time::Duration::from_secs(expires_at.timestamp().max(0) as u64);

        self.token_cache.write().await.insert(
            installation_id,
            (token_response.token.clone(), expires_at_system),
        );

        info!("Successfully obtained installation access token");
        Ok(token_response.token)
    }

    fn authorized(
        &self,
        builder: RequestBuilder,
        token: &str,
        correlation_id: Option<&str>,
    ) -> RequestBuilder {
        let builder = builder
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github.v3+json");
        match correlation_id {
            Some(cid) => builder.header(CORRELATION_ID_HEADER, cid),
            None => builder,
        }
    }

    fn issue_url(&self, pr: &PullRequestInfo) -> String {
        format!(
            "{}/repos/{}/{}/issues/{}",
            self.api_url, pr.repo_owner, pr.repo_name, pr.pr_number
        )
    }

    /// GET every page of a list endpoint.
    ///
    /// A 401 is retried once with a freshly minted token, in case the cached
    /// one was revoked early.
    async fn get_paged<T: DeserializeOwned>(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        url: &str,
        what: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1;
        let mut retried = false;

        loop {
            let token = self.get_installation_token(installation_id).await?;
            let page_url = format!("{}?page={}&per_page={}", url, page, PER_PAGE);
            let response = self
                .authorized(self.client.get(&page_url), &token, correlation_id)
                .send()
                .await
                .with_context(|| format!("Failed to send {} request", what))?;

            if response.status() == StatusCode::UNAUTHORIZED && !retried {
                warn!("Got 401 on {} page {}, retrying with fresh token", what, page);
                self.token_cache.write().await.remove(&installation_id);
                retried = true;
                continue;
            }

            let response = check_status(response, what).await?;
            let batch: Vec<T> = response
                .json()
                .await
                .with_context(|| format!("Failed to parse {} response", what))?;
            let count = batch.len();
            items.extend(batch);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    pub async fn get_labels(
        &self,
        correlation_id: Option<&str>,
        pr: &PullRequestInfo,
    ) -> Result<Vec<String>> {
        let url = format!("{}/labels", self.issue_url(pr));
        let labels: Vec<Label> = self
            .get_paged(correlation_id, pr.installation_id, &url, "labels")
            .await?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    pub async fn add_label(
        &self,
        correlation_id: Option<&str>,
        pr: &PullRequestInfo,
        name: &str,
    ) -> Result<()> {
        let url = format!("{}/labels", self.issue_url(pr));
        let token = self.get_installation_token(pr.installation_id).await?;
        let body = serde_json::to_string(&AddLabelsRequest { labels: [name] })?;

        let response = self
            .authorized(self.client.post(&url), &token, correlation_id)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .context("Failed to send add label request")?;
        check_status(response, "adding a label").await?;
        Ok(())
    }

    /// Remove a label. A label that is already gone counts as removed.
    pub async fn remove_label(
        &self,
        correlation_id: Option<&str>,
        pr: &PullRequestInfo,
        name: &str,
    ) -> Result<()> {
        // Label names contain '/', so the name is pushed as one encoded segment.
        let mut url = Url::parse(&format!("{}/labels", self.issue_url(pr)))
            .context("Invalid label URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("GitHub API URL cannot be a base"))?
            .push(name);

        let token = self.get_installation_token(pr.installation_id).await?;
        let response = self
            .authorized(self.client.delete(url), &token, correlation_id)
            .send()
            .await
            .context("Failed to send remove label request")?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!(
                "Label '{}' already absent from {}/{}#{}",
                name, pr.repo_owner, pr.repo_name, pr.pr_number
            );
            return Ok(());
        }
        check_status(response, "removing a label").await?;
        Ok(())
    }

    pub async fn get_pr_comments(
        &self,
        correlation_id: Option<&str>,
        pr: &PullRequestInfo,
    ) -> Result<Vec<IssueComment>> {
        let url = format!("{}/comments", self.issue_url(pr));
        self.get_paged(correlation_id, pr.installation_id, &url, "comments")
            .await
    }

    pub async fn post_comment(
        &self,
        correlation_id: Option<&str>,
        pr: &PullRequestInfo,
        body: &str,
    ) -> Result<u64> {
        let url = format!("{}/comments", self.issue_url(pr));
        info!(
            "Posting comment to PR #{} in {}/{}",
            pr.pr_number, pr.repo_owner, pr.repo_name
        );

        let token = self.get_installation_token(pr.installation_id).await?;
        let request_body = serde_json::to_string(&CreateCommentRequest { body })?;
        let response = self
            .authorized(self.client.post(&url), &token, correlation_id)
            .header("Content-Type", "application/json")
            .body(request_body)
            .send()
            .await
            .context("Failed to send PR comment request")?;
        let response = check_status(response, "posting a comment").await?;

        let comment: IssueComment = response
            .json()
            .await
            .context("Failed to parse comment response")?;
        info!("Successfully posted comment with ID: {}", comment.id);
        Ok(comment.id)
    }

    pub async fn delete_comment(
        &self,
        correlation_id: Option<&str>,
        pr: &PullRequestInfo,
        comment_id: u64,
    ) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/issues/comments/{}",
            self.api_url, pr.repo_owner, pr.repo_name, comment_id
        );
        let token = self.get_installation_token(pr.installation_id).await?;
        let response = self
            .authorized(self.client.delete(&url), &token, correlation_id)
            .send()
            .await
            .context("Failed to send delete comment request")?;
        check_status(response, "deleting a comment").await?;
        Ok(())
    }

    /// Commits of a pull request, oldest first.
    pub async fn get_pr_commits(
        &self,
        correlation_id: Option<&str>,
        pr: &PullRequestInfo,
    ) -> Result<Vec<PullRequestCommit>> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/commits",
            self.api_url, pr.repo_owner, pr.repo_name, pr.pr_number
        );
        self.get_paged(correlation_id, pr.installation_id, &url, "commits")
            .await
    }

    /// Login the app comments as, `{slug}[bot]`. Fetched once and cached.
    pub async fn get_bot_login(&self, correlation_id: Option<&str>) -> Result<String> {
        let login = self
            .bot_login
            .get_or_try_init(|| async {
                let jwt = self.generate_jwt()?;
                let url = format!("{}/app", self.api_url);
                let response = self
                    .authorized(self.client.get(&url), &jwt, correlation_id)
                    .send()
                    .await
                    .context("Failed to send app info request")?;
                let response = check_status(response, "fetching app info").await?;
                let app: AppInfoResponse = response
                    .json()
                    .await
                    .context("Failed to parse app info response")?;
                Ok::<_, anyhow::Error>(format!("{}[bot]", app.slug))
            })
            .await?;
        Ok(login.clone())
    }

    #[cfg(test)]
    pub(crate) async fn seed_for_tests(
        &self,
        installation_id: u64,
        token: &str,
        bot_login: Option<&str>,
    ) {
        let expires = SystemTime::now() + std::time::Duration::from_secs(3600);
        self.token_cache
            .write()
            .await
            .insert(installation_id, (token.to_string(), expires));
        if let Some(login) = bot_login {
            let _ = self.bot_login.set(login.to_string());
        }
    }
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response
        .text()
        .await
        .context("Failed to read error response body")?;
    error!("GitHub API error while {}: {} - {}", what, status, error_text);
    Err(anyhow!(
        "GitHub API error while {}: {} - {}",
        what,
        status,
        error_text
    ))
}
