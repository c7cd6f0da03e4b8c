//! Inbound events and their classification into desired state changes.
//!
//! Transport payloads are converted into these shapes by the server; the
//! classifier itself never touches the network.

use crate::command::{CommandTable, DesiredState};
use crate::state::{ChangeId, CommitSha, ReviewContext};

/// Lifecycle action carried by a comment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentAction {
    Created,
    Edited,
    Deleted,
    Other,
}

/// Lifecycle action carried by a review event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Submitted,
    Edited,
    Dismissed,
    Other,
}

/// The verdict of a submitted review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
    Commented,
    Other,
}

impl ReviewVerdict {
    /// Webhooks send review states in lowercase, the REST API in uppercase.
    pub fn parse(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "APPROVED" => ReviewVerdict::Approved,
            "CHANGES_REQUESTED" => ReviewVerdict::ChangesRequested,
            "COMMENTED" => ReviewVerdict::Commented,
            _ => ReviewVerdict::Other,
        }
    }
}

/// A comment on the change conversation or on a diff line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEvent {
    pub action: CommentAction,
    /// False for plain issues; comments there never gate anything.
    pub is_pull_request: bool,
    pub is_open: bool,
    pub context: ReviewContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewEvent {
    pub action: ReviewAction,
    pub verdict: ReviewVerdict,
    pub context: ReviewContext,
}

/// Lifecycle action carried by a pull request event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestAction {
    Opened,
    Reopened,
    Synchronize,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub change: ChangeId,
    pub merged: bool,
    pub head_sha: CommitSha,
}

/// All inbound events the engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    IssueComment(CommentEvent),
    ReviewComment(CommentEvent),
    Review(ReviewEvent),
    PullRequest(PullRequestEvent),
}

impl ChangeEvent {
    /// The change the event is about.
    pub fn change(&self) -> &ChangeId {
        match self {
            ChangeEvent::IssueComment(e) | ChangeEvent::ReviewComment(e) => &e.context.change,
            ChangeEvent::Review(e) => &e.context.change,
            ChangeEvent::PullRequest(e) => &e.change,
        }
    }

    /// Short description for logging.
    pub fn log_summary(&self) -> String {
        match self {
            ChangeEvent::IssueComment(e) => {
                format!("IssueComment({:?} by {} on {})", e.action, e.context.actor, e.context.change)
            }
            ChangeEvent::ReviewComment(e) => format!(
                "ReviewComment({:?} by {} on {})",
                e.action, e.context.actor, e.context.change
            ),
            ChangeEvent::Review(e) => format!(
                "Review({:?} {:?} by {} on {})",
                e.action, e.verdict, e.context.actor, e.context.change
            ),
            ChangeEvent::PullRequest(e) => {
                format!("PullRequest({:?} on {})", e.action, e.change)
            }
        }
    }
}

/// An event that resolved to a state change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub desired: DesiredState,
    pub context: ReviewContext,
}

/// Map an inbound event to the state change it asks for, if any.
///
/// `reviews_act_as_commands` lets an approving review grant and a
/// changes-requested review revoke. A command line in a submitted review's
/// body is honoured for any table whether or not the switch is on, and the
/// verdict is then ignored. Pull request events never classify here; they
/// drive notifications and re-evaluation instead.
pub fn classify(
    event: &ChangeEvent,
    table: &CommandTable,
    reviews_act_as_commands: bool,
) -> Option<Classified> {
    match event {
        ChangeEvent::IssueComment(comment) => {
            if !comment.is_pull_request
                || !comment.is_open
                || comment.action != CommentAction::Created
            {
                return None;
            }
            classify_body(table, &comment.context)
        }
        ChangeEvent::ReviewComment(comment) => {
            if !comment.is_open || comment.action != CommentAction::Created {
                return None;
            }
            classify_body(table, &comment.context)
        }
        ChangeEvent::Review(review) => {
            if review.action != ReviewAction::Submitted {
                return None;
            }
            // An explicit command in the review body wins; the verdict is ignored.
            if table.mentions_any(&review.context.body) {
                return classify_body(table, &review.context);
            }
            if !reviews_act_as_commands {
                return None;
            }
            let desired = match review.verdict {
                ReviewVerdict::Approved => DesiredState::Grant,
                ReviewVerdict::ChangesRequested => DesiredState::Revoke,
                ReviewVerdict::Commented | ReviewVerdict::Other => return None,
            };
            Some(Classified {
                desired,
                context: review.context.clone(),
            })
        }
        ChangeEvent::PullRequest(_) => None,
    }
}

fn classify_body(table: &CommandTable, context: &ReviewContext) -> Option<Classified> {
    table.parse(&context.body).map(|desired| Classified {
        desired,
        context: context.clone(),
    })
}
