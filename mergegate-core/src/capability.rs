//! Capabilities the engine consumes from its collaborators.
//!
//! A `ChangeStore` is bound to a single change; the server builds one per
//! event. Implementations must not cache between calls, every read reflects
//! the platform's current view.

use async_trait::async_trait;

use crate::error::CapabilityResult;
use crate::state::{ChangeId, Comment, CommentId, Commit, OwnersSnapshot};

#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// The change this store reads and writes.
    fn change(&self) -> &ChangeId;

    async fn fetch_labels(&self) -> CapabilityResult<Vec<String>>;

    async fn add_label(&self, name: &str) -> CapabilityResult<()>;

    async fn remove_label(&self, name: &str) -> CapabilityResult<()>;

    /// Comments in creation order, oldest first.
    async fn list_comments(&self) -> CapabilityResult<Vec<Comment>>;

    async fn create_comment(&self, body: &str) -> CapabilityResult<()>;

    async fn delete_comment(&self, id: CommentId) -> CapabilityResult<()>;

    /// Commits in the order the platform lists them, oldest first.
    async fn fetch_commits(&self) -> CapabilityResult<Vec<Commit>>;

    /// Login the bot posts comments as.
    async fn bot_identity(&self) -> CapabilityResult<String>;
}

/// Source of the reviewer/committer rosters for a change.
#[async_trait]
pub trait OwnersProvider: Send + Sync {
    async fn load_owners(&self, change: &ChangeId) -> CapabilityResult<OwnersSnapshot>;
}
