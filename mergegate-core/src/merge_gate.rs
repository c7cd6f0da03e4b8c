//! Merge-gate resolver.
//!
//! Two entry points share this module: explicit `/merge` commands, and
//! re-evaluation when new commits land on a change that carries the marker.
//!
//! When tree-hash persistence is on, the SHA the marker was granted at is
//! kept in a bot comment (a "tree-hash record"). On re-evaluation the newest
//! pristine record is read back, and the marker survives only if every
//! commit after the recorded one came from the trusted auto-update
//! committer.

use regex::Regex;
use std::sync::LazyLock;

use crate::auth::{AuthorizedAction, Rejection};
use crate::command::DesiredState;
use crate::effect::Effect;
use crate::state::{Comment, CommitSha, Commit};

pub const MERGE_MARKER: &str = "status/can-merge";

/// Committer login the platform uses for "update branch" merge commits.
pub const DEFAULT_TRUSTED_COMMITTER: &str = "web-flow";

pub const STALE_MARKER_NOTICE: &str =
    "New changes are detected. Can merge label has been removed.";

static TREE_HASH_RECORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Can merge label has been added\.  <details>Git tree hash: (.*)</details>")
        .expect("tree-hash record pattern is valid")
});

/// Body of the comment recording the SHA the marker was granted at.
pub fn tree_hash_record(sha: &CommitSha) -> String {
    format!(
        "Can merge label has been added.  <details>Git tree hash: {}</details>",
        sha
    )
}

/// Extract the recorded SHA, if `body` is a well-formed record.
pub fn parse_tree_hash_record(body: &str) -> Option<CommitSha> {
    let caps = TREE_HASH_RECORD_RE.captures(body)?;
    let hash = caps.get(1)?.as_str();
    if hash.is_empty() {
        return None;
    }
    Some(CommitSha::from(hash))
}

/// True for any bot-authored record, edited or not.
pub fn is_tree_hash_record(comment: &Comment, bot: &str) -> bool {
    comment.author == bot && TREE_HASH_RECORD_RE.is_match(&comment.body)
}

pub fn is_stale_marker_notice(comment: &Comment, bot: &str) -> bool {
    comment.author == bot && comment.body.contains(STALE_MARKER_NOTICE)
}

/// Newest trustworthy record: bot-authored, well-formed and never edited.
///
/// `comments` are oldest first; the scan runs backwards and skips anything
/// that does not qualify rather than stopping at it.
pub fn find_latest_record(comments: &[Comment], bot: &str) -> Option<CommitSha> {
    comments
        .iter()
        .rev()
        .filter(|comment| comment.author == bot && comment.is_pristine())
        .find_map(|comment| parse_tree_hash_record(&comment.body))
}

/// Whether every commit after `recorded` was made by `trusted`.
///
/// The last commit whose SHA equals `recorded` marks the boundary. If no
/// commit matches, the boundary falls back to the first commit, so all but
/// the first commit are inspected. Commits without a linked committer are
/// never trusted.
pub fn all_trusted_since(commits: &[Commit], recorded: &CommitSha, trusted: &str) -> bool {
    let boundary = commits
        .iter()
        .rposition(|commit| &commit.sha == recorded)
        .unwrap_or(0);
    commits
        .get(boundary + 1..)
        .unwrap_or(&[])
        .iter()
        .all(|commit| commit.committer.as_deref() == Some(trusted))
}

/// Outcome of an authorized merge command against the current labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// Add the marker.
    Grant,
    /// Remove the marker.
    Revoke,
    /// The marker is already where the actor wants it.
    NoChange,
    /// Granting is not allowed yet; answer with this rejection.
    Reject(Rejection),
}

/// Decide what a merge command does.
///
/// Satisfaction is exact equality between the approval level and the
/// threshold.
pub fn decide_command(
    has_marker: bool,
    approval_level: u32,
    required_approvals: u32,
    action: &AuthorizedAction,
) -> MergeDecision {
    match (action.desired(), has_marker) {
        (DesiredState::Revoke, true) => MergeDecision::Revoke,
        (DesiredState::Grant, false) if approval_level == required_approvals => {
            MergeDecision::Grant
        }
        (DesiredState::Grant, false) => MergeDecision::Reject(Rejection::InsufficientApprovals {
            required: required_approvals,
        }),
        (DesiredState::Revoke, false) | (DesiredState::Grant, true) => MergeDecision::NoChange,
    }
}

/// Effects for granting the marker.
///
/// With persistence, stale records are deleted before the new one is posted
/// so the newest record is always the authoritative one. `head` is `None`
/// when the commit list could not be read; the record is then skipped.
pub fn grant_effects(
    store_tree_hash: bool,
    head: Option<&CommitSha>,
    comments: &[Comment],
    bot: Option<&str>,
) -> Vec<Effect> {
    let mut effects = vec![Effect::AddLabel {
        name: MERGE_MARKER.to_string(),
    }];

    if store_tree_hash {
        if let Some(bot) = bot {
            effects.extend(
                comments
                    .iter()
                    .filter(|c| is_tree_hash_record(c, bot))
                    .map(|c| Effect::DeleteComment { id: c.id }),
            );
        }
        match head {
            Some(sha) => effects.push(Effect::PostNotification {
                body: tree_hash_record(sha),
            }),
            None => effects.push(Effect::Log {
                level: crate::effect::LogLevel::Warn,
                message: "No commits available, skipping tree-hash record".to_string(),
            }),
        }
    }

    if let Some(bot) = bot {
        effects.extend(
            comments
                .iter()
                .filter(|c| is_stale_marker_notice(c, bot))
                .map(|c| Effect::DeleteComment { id: c.id }),
        );
    }

    effects
}

/// Effects for revoking the marker by command.
pub fn revoke_effects(store_tree_hash: bool, comments: &[Comment], bot: Option<&str>) -> Vec<Effect> {
    let mut effects = vec![Effect::RemoveLabel {
        name: MERGE_MARKER.to_string(),
    }];
    if let (true, Some(bot)) = (store_tree_hash, bot) {
        effects.extend(
            comments
                .iter()
                .filter(|c| is_tree_hash_record(c, bot))
                .map(|c| Effect::DeleteComment { id: c.id }),
        );
    }
    effects
}

/// Outcome of re-evaluating the marker after new commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// No marker on the change; nothing to protect.
    NoMarker,
    /// Only trusted commits landed since the recorded SHA.
    Keep,
    /// Remove the marker and tell the participants why.
    Remove,
}

/// Decide whether the marker survives a synchronize.
///
/// `record` is the result of [`find_latest_record`], and is ignored unless
/// persistence is on. Without a record the marker is always removed.
pub fn decide_sync(
    has_marker: bool,
    store_tree_hash: bool,
    record: Option<&CommitSha>,
    commits: &[Commit],
    trusted: &str,
) -> SyncDecision {
    if !has_marker {
        return SyncDecision::NoMarker;
    }
    match (store_tree_hash, record) {
        (true, Some(recorded)) if all_trusted_since(commits, recorded, trusted) => {
            SyncDecision::Keep
        }
        _ => SyncDecision::Remove,
    }
}

/// Effects for a marker invalidated by new commits.
pub fn stale_effects() -> Vec<Effect> {
    vec![
        Effect::RemoveLabel {
            name: MERGE_MARKER.to_string(),
        },
        Effect::CreateComment {
            body: STALE_MARKER_NOTICE.to_string(),
        },
    ]
}
