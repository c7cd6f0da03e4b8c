//! In-memory implementations of the capabilities.
//!
//! Used by the test suites and for replaying scenarios locally. Operations
//! can be made to fail once via [`InMemoryChange::fail_next`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::capability::{ChangeStore, OwnersProvider};
use crate::error::{CapabilityError, CapabilityResult};
use crate::state::{ChangeId, Comment, CommentId, Commit, CommitSha, OwnersSnapshot};

#[derive(Debug, Default)]
struct Inner {
    labels: Vec<String>,
    comments: Vec<Comment>,
    commits: Vec<Commit>,
    next_comment_id: u64,
    /// Seconds since the fixed epoch, advanced on every write.
    clock: i64,
    failing: HashSet<String>,
}

/// A single change held in memory.
pub struct InMemoryChange {
    change: ChangeId,
    bot: String,
    inner: RwLock<Inner>,
    label_mutations: AtomicUsize,
}

impl InMemoryChange {
    pub fn new(change: ChangeId, bot: impl Into<String>) -> Self {
        Self {
            change,
            bot: bot.into(),
            inner: RwLock::new(Inner {
                next_comment_id: 1,
                ..Inner::default()
            }),
            label_mutations: AtomicUsize::new(0),
        }
    }

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap_or_default()
    }

    /// Make the next call to `operation` (a `ChangeStore` method name) fail.
    pub async fn fail_next(&self, operation: &str) {
        self.inner.write().await.failing.insert(operation.to_string());
    }

    async fn check(&self, operation: &str) -> CapabilityResult<()> {
        if self.inner.write().await.failing.remove(operation) {
            return Err(CapabilityError::new(format!("injected {} failure", operation)));
        }
        Ok(())
    }

    pub async fn set_labels(&self, labels: &[&str]) {
        self.inner.write().await.labels = labels.iter().map(|s| s.to_string()).collect();
    }

    pub async fn labels(&self) -> Vec<String> {
        self.inner.read().await.labels.clone()
    }

    pub async fn has_label(&self, name: &str) -> bool {
        self.inner.read().await.labels.iter().any(|l| l == name)
    }

    /// Number of successful label writes since creation.
    pub fn label_mutations(&self) -> usize {
        self.label_mutations.load(Ordering::SeqCst)
    }

    pub async fn push_commit(&self, sha: &str, committer: Option<&str>) {
        self.inner.write().await.commits.push(Commit {
            sha: CommitSha::from(sha),
            committer: committer.map(|s| s.to_string()),
        });
    }

    /// Add a comment as `author`, returning its ID.
    pub async fn push_comment(&self, author: &str, body: &str) -> CommentId {
        let mut inner = self.inner.write().await;
        Self::insert_comment(&mut inner, author, body)
    }

    /// Edit a comment in place, which bumps its `updated_at`.
    pub async fn edit_comment(&self, id: CommentId, body: &str) {
        let mut inner = self.inner.write().await;
        inner.clock += 1;
        let now = Self::epoch() + Duration::seconds(inner.clock);
        if let Some(comment) = inner.comments.iter_mut().find(|c| c.id == id) {
            comment.body = body.to_string();
            comment.updated_at = now;
        }
    }

    pub async fn comments(&self) -> Vec<Comment> {
        self.inner.read().await.comments.clone()
    }

    pub async fn comment_bodies(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .comments
            .iter()
            .map(|c| c.body.clone())
            .collect()
    }

    fn insert_comment(inner: &mut Inner, author: &str, body: &str) -> CommentId {
        inner.clock += 1;
        let at = Self::epoch() + Duration::seconds(inner.clock);
        let id = CommentId(inner.next_comment_id);
        inner.next_comment_id += 1;
        inner.comments.push(Comment {
            id,
            body: body.to_string(),
            author: author.to_string(),
            created_at: at,
            updated_at: at,
        });
        id
    }
}

#[async_trait]
impl ChangeStore for InMemoryChange {
    fn change(&self) -> &ChangeId {
        &self.change
    }

    async fn fetch_labels(&self) -> CapabilityResult<Vec<String>> {
        self.check("fetch_labels").await?;
        Ok(self.labels().await)
    }

    async fn add_label(&self, name: &str) -> CapabilityResult<()> {
        self.check("add_label").await?;
        let mut inner = self.inner.write().await;
        if !inner.labels.iter().any(|l| l == name) {
            inner.labels.push(name.to_string());
        }
        self.label_mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_label(&self, name: &str) -> CapabilityResult<()> {
        self.check("remove_label").await?;
        self.inner.write().await.labels.retain(|l| l != name);
        self.label_mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_comments(&self) -> CapabilityResult<Vec<Comment>> {
        self.check("list_comments").await?;
        Ok(self.comments().await)
    }

    async fn create_comment(&self, body: &str) -> CapabilityResult<()> {
        self.check("create_comment").await?;
        let mut inner = self.inner.write().await;
        Self::insert_comment(&mut inner, &self.bot, body);
        Ok(())
    }

    async fn delete_comment(&self, id: CommentId) -> CapabilityResult<()> {
        self.check("delete_comment").await?;
        let mut inner = self.inner.write().await;
        let before = inner.comments.len();
        inner.comments.retain(|c| c.id != id);
        if inner.comments.len() == before {
            return Err(CapabilityError::new(format!("comment {} not found", id)));
        }
        Ok(())
    }

    async fn fetch_commits(&self) -> CapabilityResult<Vec<Commit>> {
        self.check("fetch_commits").await?;
        Ok(self.inner.read().await.commits.clone())
    }

    async fn bot_identity(&self) -> CapabilityResult<String> {
        self.check("bot_identity").await?;
        Ok(self.bot.clone())
    }
}

/// Owners provider returning a fixed snapshot, or failing when empty.
#[derive(Debug, Default)]
pub struct StaticOwners {
    snapshot: Option<OwnersSnapshot>,
}

impl StaticOwners {
    pub fn new(snapshot: OwnersSnapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
        }
    }

    /// A provider whose lookups always fail.
    pub fn unavailable() -> Self {
        Self { snapshot: None }
    }
}

#[async_trait]
impl OwnersProvider for StaticOwners {
    async fn load_owners(&self, change: &ChangeId) -> CapabilityResult<OwnersSnapshot> {
        self.snapshot
            .clone()
            .ok_or_else(|| CapabilityError::new(format!("no owners configured for {}", change)))
    }
}
