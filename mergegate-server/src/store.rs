//! `ChangeStore` backed by the GitHub REST API.

use async_trait::async_trait;
use mergegate_core::{
    CapabilityError, CapabilityResult, ChangeId, ChangeStore, Comment, CommentId, Commit,
    CommitSha,
};
use std::sync::Arc;

use crate::github::{GitHubClient, PullRequestInfo};

/// One pull request, as seen through the app installation.
pub struct GitHubChange {
    client: Arc<GitHubClient>,
    pr: PullRequestInfo,
    change: ChangeId,
    correlation_id: Option<String>,
}

impl GitHubChange {
    pub fn new(
        client: Arc<GitHubClient>,
        pr: PullRequestInfo,
        correlation_id: Option<String>,
    ) -> Self {
        let change = ChangeId::new(pr.repo_owner.clone(), pr.repo_name.clone(), pr.pr_number);
        Self {
            client,
            pr,
            change,
            correlation_id,
        }
    }

    fn cid(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

fn capability_error(err: anyhow::Error) -> CapabilityError {
    CapabilityError::new(format!("{:#}", err))
}

#[async_trait]
impl ChangeStore for GitHubChange {
    fn change(&self) -> &ChangeId {
        &self.change
    }

    async fn fetch_labels(&self) -> CapabilityResult<Vec<String>> {
        self.client
            .get_labels(self.cid(), &self.pr)
            .await
            .map_err(capability_error)
    }

    async fn add_label(&self, name: &str) -> CapabilityResult<()> {
        self.client
            .add_label(self.cid(), &self.pr, name)
            .await
            .map_err(capability_error)
    }

    async fn remove_label(&self, name: &str) -> CapabilityResult<()> {
        self.client
            .remove_label(self.cid(), &self.pr, name)
            .await
            .map_err(capability_error)
    }

    async fn list_comments(&self) -> CapabilityResult<Vec<Comment>> {
        let comments = self
            .client
            .get_pr_comments(self.cid(), &self.pr)
            .await
            .map_err(capability_error)?;
        Ok(comments
            .into_iter()
            .map(|c| Comment {
                id: CommentId(c.id),
                body: c.body,
                author: c.user.map(|u| u.login).unwrap_or_default(),
                created_at: c.created_at,
                updated_at: c.updated_at,
            })
            .collect())
    }

    async fn create_comment(&self, body: &str) -> CapabilityResult<()> {
        self.client
            .post_comment(self.cid(), &self.pr, body)
            .await
            .map(|_| ())
            .map_err(capability_error)
    }

    async fn delete_comment(&self, id: CommentId) -> CapabilityResult<()> {
        self.client
            .delete_comment(self.cid(), &self.pr, id.0)
            .await
            .map_err(capability_error)
    }

    async fn fetch_commits(&self) -> CapabilityResult<Vec<Commit>> {
        let commits = self
            .client
            .get_pr_commits(self.cid(), &self.pr)
            .await
            .map_err(capability_error)?;
        Ok(commits
            .into_iter()
            .map(|c| Commit {
                sha: CommitSha(c.sha),
                committer: c.committer.map(|u| u.login),
            })
            .collect())
    }

    async fn bot_identity(&self) -> CapabilityResult<String> {
        self.client
            .get_bot_login(self.cid())
            .await
            .map_err(capability_error)
    }
}
