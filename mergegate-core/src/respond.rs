//! Response and notification composer.
//!
//! Pure text formatting: replies to commands, the review notification, and
//! the fixed notices the merge gate posts.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::approval::APPROVAL_LABEL_PREFIX;
use crate::auth::Rejection;
use crate::command::APPROVAL_COMMANDS;
use crate::merge_gate::MERGE_MARKER;
use crate::state::{ChangeId, Comment};

/// Which policy a command or rejection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Approval,
    Merge,
}

pub const REVIEW_NOTIFICATION_TITLE: &str = "[REVIEW NOTIFICATION]";

static REVIEWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)- @*([a-z0-9](?:-?[a-z0-9]){0,38})").expect("reviewer pattern is valid")
});

/// Roster page for a change: `{base}/repos/{org}/{repo}/pulls/{number}/owners`.
pub fn owners_url(base: &str, change: &ChangeId) -> String {
    format!(
        "{}/repos/{}/{}/pulls/{}/owners",
        base.trim_end_matches('/'),
        change.org,
        change.repo,
        change.number
    )
}

/// Reply to `login`, quoting the body that triggered the reply.
pub fn format_response_raw(body: &str, body_url: &str, login: &str, reply: &str) -> String {
    let quoted: Vec<String> = body.split('\n').map(|line| format!(">{}", line)).collect();
    format!(
        "@{}: {}\n\n<details>\n\nIn response to [this]({}):\n\n{}\n</details>",
        login,
        reply,
        body_url,
        quoted.join("\n")
    )
}

/// The one-line reason given for a rejection.
pub fn rejection_reply(rejection: &Rejection) -> String {
    match rejection {
        Rejection::SelfGrant {
            domain: Domain::Approval,
        } => "you cannot `/lgtm` your own PR.".to_string(),
        Rejection::SelfGrant {
            domain: Domain::Merge,
        } => "you cannot merge your own PR.".to_string(),
        Rejection::GrantNotInRole {
            domain: Domain::Approval,
            roster_url,
        } => format!(
            "`/lgtm` is only allowed for the reviewers in [list]({}).",
            roster_url
        ),
        Rejection::GrantNotInRole {
            domain: Domain::Merge,
            roster_url,
        } => format!(
            "adding '{}' is restricted to committers in [list]({}).",
            MERGE_MARKER, roster_url
        ),
        Rejection::RevokeNotInRole {
            domain: Domain::Approval,
            roster_url,
        } => format!(
            "`/lgtm cancel` is only allowed for the PR author or the reviewers in [list]({}).",
            roster_url
        ),
        Rejection::RevokeNotInRole {
            domain: Domain::Merge,
            roster_url,
        } => format!(
            "removing '{}' is restricted to committers in [list]({}) or PR author.",
            MERGE_MARKER, roster_url
        ),
        Rejection::InsufficientApprovals { required } => format!(
            "adding '{}' to this PR must have {} LGTMs",
            MERGE_MARKER, required
        ),
    }
}

/// Full comment body answering a rejected command.
pub fn rejection_comment(rejection: &Rejection, body: &str, body_url: &str, login: &str) -> String {
    format_response_raw(body, body_url, login, &rejection_reply(rejection))
}

/// Body of the review notification listing who has approved so far.
pub fn review_notification(reviewers: &BTreeSet<String>, owners_url: &str) -> String {
    let mut message = String::new();
    if reviewers.is_empty() {
        message.push_str("This pull request has not been reviewed.\n");
    } else {
        message.push_str("This pull request has been reviewed by:\n\n");
        for reviewer in reviewers {
            message.push_str(&format!("- {}\n", reviewer));
        }
    }
    message.push_str(&format!(
        "\nTo complete the pull request process, please ask the reviewers in the [list]({url}) \
         to review by filling `/cc @reviewer` in the comment.\n\
         After reviewing, you can assign this pull request to the committer in the [list]({url}) \
         by filling `/assign @committer` in the comment to help you merge this pull request.\n\n\
         <details>\n\n\
         Reviewer can indicate their review by writing `{grant}` in a comment.\n\
         Reviewer can cancel approval by writing `{revoke}` in a comment.\n\
         </details>",
        url = owners_url,
        grant = APPROVAL_COMMANDS.grant_verb(),
        revoke = APPROVAL_COMMANDS.revoke_verb(),
    ));
    format!("{}\n\n{}", REVIEW_NOTIFICATION_TITLE, message)
}

/// True if `comment` is a review notification posted by `bot`.
pub fn is_review_notification(comment: &Comment, bot: &str) -> bool {
    comment.author == bot
        && comment
            .body
            .get(..REVIEW_NOTIFICATION_TITLE.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(REVIEW_NOTIFICATION_TITLE))
}

/// Logins listed as `- login` lines in a notification body.
pub fn reviewers_from_notification(body: &str) -> BTreeSet<String> {
    REVIEWER_RE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Short description of the approval labels, used by `/help`.
pub fn approval_label_pattern() -> String {
    format!("{}{{number}}", APPROVAL_LABEL_PREFIX)
}
