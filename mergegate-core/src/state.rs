//! Value types describing a change as observed on a single invocation.
//!
//! Nothing here is persisted by the engine. Every value is rebuilt from the
//! change's current labels, comments and commits whenever an event arrives.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;

/// Newtype for commit SHA to prevent mixing with other strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitSha(pub String);

impl CommitSha {
    /// Returns a truncated SHA for display (first 7 characters).
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CommitSha {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitSha {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype for a comment ID on the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommentId(pub u64);

impl From<u64> for CommentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a pull request across repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeId {
    pub org: String,
    pub repo: String,
    pub number: u64,
}

impl ChangeId {
    pub fn new(org: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            org: org.into(),
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.org, self.repo, self.number)
    }
}

/// A conversation comment on the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: CommentId,
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    /// True if the comment was never edited after creation.
    pub fn is_pristine(&self) -> bool {
        self.updated_at == self.created_at
    }
}

/// One commit of the change, in the order the platform lists them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub sha: CommitSha,
    /// Login of the committer, if the platform could link one.
    pub committer: Option<String>,
}

/// Reviewer and committer rosters plus the approval threshold for a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnersSnapshot {
    pub reviewers: HashSet<String>,
    pub committers: HashSet<String>,
    pub required_approvals: u32,
}

impl OwnersSnapshot {
    pub fn new<R, C, S>(reviewers: R, committers: C, required_approvals: u32) -> Self
    where
        R: IntoIterator<Item = S>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reviewers: reviewers.into_iter().map(Into::into).collect(),
            committers: committers.into_iter().map(Into::into).collect(),
            required_approvals,
        }
    }
}

/// Everything an event tells us about who asked for what, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewContext {
    pub change: ChangeId,
    /// Login of the user who wrote the comment or review.
    pub actor: String,
    /// Login of the change author.
    pub change_author: String,
    pub body: String,
    pub html_url: String,
}

impl ReviewContext {
    pub fn actor_is_author(&self) -> bool {
        self.actor == self.change_author
    }
}
