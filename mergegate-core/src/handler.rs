//! Per-event orchestration of the approval and merge policies.
//!
//! Each handler reads what it needs from the change, asks the planners for
//! effects, and hands them to the interpreter. Handlers hold no state between
//! calls; the change's labels and comments are the only record.

use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::approval;
use crate::auth::{authorize, precheck_self_grant, AuthorizedAction, Rejection};
use crate::capability::{ChangeStore, OwnersProvider};
use crate::command::{DesiredState, APPROVAL_COMMANDS, MERGE_COMMANDS};
use crate::effect::Effect;
use crate::error::{CapabilityResult, GateError};
use crate::event::{classify, ChangeEvent, PullRequestAction, PullRequestEvent};
use crate::interpreter::{execute_effects, ExecutionReport, InterpreterContext};
use crate::merge_gate::{self, MergeDecision, SyncDecision, MERGE_MARKER};
use crate::respond::{
    is_review_notification, owners_url, rejection_comment, review_notification,
    reviewers_from_notification, Domain,
};
use crate::state::{ChangeId, Comment, OwnersSnapshot, ReviewContext};

/// Per-repository switches for the approval policy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApprovalSettings {
    /// Approving reviews grant and changes-requested reviews revoke.
    pub review_acts_as_lgtm: bool,
    /// Base URL of the owners web UI, used in roster links.
    pub owners_link_base: String,
}

/// Per-repository switches for the merge policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSettings {
    /// Record the granted SHA in a comment so trusted pushes keep the marker.
    pub store_tree_hash: bool,
    pub owners_link_base: String,
    pub trusted_committer: String,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            store_tree_hash: false,
            owners_link_base: String::new(),
            trusted_committer: merge_gate::DEFAULT_TRUSTED_COMMITTER.to_string(),
        }
    }
}

/// Collaborators for one event.
pub struct HandlerContext<'a> {
    pub store: &'a dyn ChangeStore,
    pub owners: &'a dyn OwnersProvider,
    pub dry_run: bool,
}

impl HandlerContext<'_> {
    async fn execute(&self, effects: Vec<Effect>) -> Result<ExecutionReport, GateError> {
        let ctx = InterpreterContext {
            store: self.store,
            dry_run: self.dry_run,
        };
        execute_effects(&ctx, effects).await
    }
}

/// How an event was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not an event this policy reacts to.
    Ignored,
    /// The actor was turned away with a reply.
    Rejected(Rejection),
    /// The change was already in the requested state.
    NoChange,
    /// Effects were executed.
    Applied(ExecutionReport),
}

/// Handle an event for the approval (`/lgtm`) policy.
pub async fn handle_approval_event(
    ctx: &HandlerContext<'_>,
    settings: &ApprovalSettings,
    event: &ChangeEvent,
) -> Result<Outcome, GateError> {
    if let ChangeEvent::PullRequest(pr) = event {
        return handle_opened(ctx, settings, pr).await;
    }

    let Some(classified) = classify(event, &APPROVAL_COMMANDS, settings.review_acts_as_lgtm) else {
        return Ok(Outcome::Ignored);
    };
    let context = &classified.context;
    info!(
        "Approval {} requested by {} on {}",
        classified.desired, context.actor, context.change
    );

    if let Err(rejection) = precheck_self_grant(Domain::Approval, context, classified.desired) {
        return reject(ctx, rejection, context).await;
    }

    let owners = load_owners(ctx, &context.change).await?;
    let action = match authorize(
        Domain::Approval,
        context,
        classified.desired,
        &owners.reviewers,
        &settings.owners_link_base,
    ) {
        Ok(action) => action,
        Err(rejection) => return reject(ctx, rejection, context).await,
    };

    let labels = or_default(ctx.store.fetch_labels().await, "labels", &context.change);
    let transition = approval::transition(&labels, owners.required_approvals, &action);
    if transition.is_no_change() {
        info!(
            "Approval level on {} stays at {} (required {})",
            context.change, transition.level_before, owners.required_approvals
        );
        return Ok(Outcome::NoChange);
    }
    info!(
        "Approval level on {}: {} -> {}",
        context.change, transition.level_before, transition.level_after
    );

    let mut effects = transition.effects;
    effects.extend(notification_effects(ctx, settings, &action, &context.change).await);

    let report = ctx.execute(effects).await?;
    Ok(Outcome::Applied(report))
}

/// Post the initial review notification on newly opened changes.
async fn handle_opened(
    ctx: &HandlerContext<'_>,
    settings: &ApprovalSettings,
    pr: &PullRequestEvent,
) -> Result<Outcome, GateError> {
    if !matches!(
        pr.action,
        PullRequestAction::Opened | PullRequestAction::Reopened
    ) {
        return Ok(Outcome::Ignored);
    }
    info!("Posting review notification on {}", pr.change);
    let body = review_notification(
        &BTreeSet::new(),
        &owners_url(&settings.owners_link_base, &pr.change),
    );
    let report = ctx.execute(vec![Effect::CreateComment { body }]).await?;
    Ok(Outcome::Applied(report))
}

/// Refresh the review notification after an approval label changed.
///
/// Everything here is best-effort: without a bot identity or comment list
/// the notification is simply left alone.
async fn notification_effects(
    ctx: &HandlerContext<'_>,
    settings: &ApprovalSettings,
    action: &AuthorizedAction,
    change: &ChangeId,
) -> Vec<Effect> {
    let bot = match ctx.store.bot_identity().await {
        Ok(bot) => bot,
        Err(err) => {
            warn!("Failed to get bot identity for {}, skipping notification: {}", change, err);
            return vec![];
        }
    };
    let comments = or_default(ctx.store.list_comments().await, "comments", change);
    let notifications: Vec<&Comment> = comments
        .iter()
        .filter(|c| is_review_notification(c, &bot))
        .collect();

    let reviewers = match action.desired() {
        DesiredState::Grant => {
            let mut reviewers = notifications
                .last()
                .map(|latest| reviewers_from_notification(&latest.body))
                .unwrap_or_default();
            if reviewers.contains(action.actor()) {
                info!("Ignoring repeated review from {} on {}", action.actor(), change);
                return vec![];
            }
            reviewers.insert(action.actor().to_string());
            reviewers
        }
        DesiredState::Revoke => BTreeSet::new(),
    };

    let mut effects: Vec<Effect> = notifications
        .iter()
        .map(|c| Effect::DeleteComment { id: c.id })
        .collect();
    effects.push(Effect::PostNotification {
        body: review_notification(&reviewers, &owners_url(&settings.owners_link_base, change)),
    });
    effects
}

/// Handle an event for the merge (`/merge`) policy.
pub async fn handle_merge_event(
    ctx: &HandlerContext<'_>,
    settings: &MergeSettings,
    event: &ChangeEvent,
) -> Result<Outcome, GateError> {
    if let ChangeEvent::PullRequest(pr) = event {
        return handle_synchronize(ctx, settings, pr).await;
    }

    let Some(classified) = classify(event, &MERGE_COMMANDS, false) else {
        return Ok(Outcome::Ignored);
    };
    let context = &classified.context;
    info!(
        "Merge {} requested by {} on {}",
        classified.desired, context.actor, context.change
    );

    if let Err(rejection) = precheck_self_grant(Domain::Merge, context, classified.desired) {
        return reject(ctx, rejection, context).await;
    }

    let owners = load_owners(ctx, &context.change).await?;
    let action = match authorize(
        Domain::Merge,
        context,
        classified.desired,
        &owners.committers,
        &settings.owners_link_base,
    ) {
        Ok(action) => action,
        Err(rejection) => return reject(ctx, rejection, context).await,
    };

    let labels = or_default(ctx.store.fetch_labels().await, "labels", &context.change);
    let has_marker = labels.iter().any(|l| l == MERGE_MARKER);
    let level = approval::current_level(&labels);

    let effects = match merge_gate::decide_command(
        has_marker,
        level,
        owners.required_approvals,
        &action,
    ) {
        MergeDecision::NoChange => {
            info!("'{}' already as requested on {}", MERGE_MARKER, context.change);
            return Ok(Outcome::NoChange);
        }
        MergeDecision::Reject(rejection) => return reject(ctx, rejection, context).await,
        MergeDecision::Grant => {
            let (bot, comments) = bot_and_comments(ctx.store, &context.change).await;
            let head = if settings.store_tree_hash {
                or_default(ctx.store.fetch_commits().await, "commits", &context.change)
                    .last()
                    .map(|c| c.sha.clone())
            } else {
                None
            };
            merge_gate::grant_effects(
                settings.store_tree_hash,
                head.as_ref(),
                &comments,
                bot.as_deref(),
            )
        }
        MergeDecision::Revoke => {
            let (bot, comments) = if settings.store_tree_hash {
                bot_and_comments(ctx.store, &context.change).await
            } else {
                (None, vec![])
            };
            merge_gate::revoke_effects(settings.store_tree_hash, &comments, bot.as_deref())
        }
    };

    let report = ctx.execute(effects).await?;
    Ok(Outcome::Applied(report))
}

/// Re-evaluate the merge marker after new commits were pushed.
async fn handle_synchronize(
    ctx: &HandlerContext<'_>,
    settings: &MergeSettings,
    pr: &PullRequestEvent,
) -> Result<Outcome, GateError> {
    if pr.action != PullRequestAction::Synchronize || pr.merged {
        return Ok(Outcome::Ignored);
    }
    let change = &pr.change;

    let labels = or_default(ctx.store.fetch_labels().await, "labels", change);
    let has_marker = labels.iter().any(|l| l == MERGE_MARKER);
    if !has_marker {
        return Ok(Outcome::NoChange);
    }

    let record = if settings.store_tree_hash {
        let bot = ctx
            .store
            .bot_identity()
            .await
            .map_err(|err| GateError::Identity(err.to_string()))?;
        let comments = or_default(ctx.store.list_comments().await, "comments", change);
        merge_gate::find_latest_record(&comments, &bot)
    } else {
        None
    };

    let commits = match &record {
        Some(recorded) => {
            info!("Found tree-hash record {} on {}", recorded.short(), change);
            or_default(ctx.store.fetch_commits().await, "commits", change)
        }
        None => vec![],
    };

    match merge_gate::decide_sync(
        has_marker,
        settings.store_tree_hash,
        record.as_ref(),
        &commits,
        &settings.trusted_committer,
    ) {
        SyncDecision::NoMarker => Ok(Outcome::NoChange),
        SyncDecision::Keep => {
            info!(
                "Only trusted commits since the recorded tree hash on {} (head {}), keeping '{}'",
                change,
                pr.head_sha.short(),
                MERGE_MARKER
            );
            Ok(Outcome::NoChange)
        }
        SyncDecision::Remove => {
            info!(
                "New changes on {} (head {}), removing '{}'",
                change,
                pr.head_sha.short(),
                MERGE_MARKER
            );
            let report = ctx.execute(merge_gate::stale_effects()).await?;
            Ok(Outcome::Applied(report))
        }
    }
}

/// Owners with a threshold of at least one approval.
async fn load_owners(
    ctx: &HandlerContext<'_>,
    change: &ChangeId,
) -> Result<OwnersSnapshot, GateError> {
    let owners = ctx
        .owners
        .load_owners(change)
        .await
        .map_err(|err| GateError::Owners {
            change: change.clone(),
            message: err.to_string(),
        })?;
    if owners.required_approvals == 0 {
        return Err(GateError::Owners {
            change: change.clone(),
            message: "required approvals must be at least 1".to_string(),
        });
    }
    Ok(owners)
}

async fn reject(
    ctx: &HandlerContext<'_>,
    rejection: Rejection,
    context: &ReviewContext,
) -> Result<Outcome, GateError> {
    let body = rejection_comment(&rejection, &context.body, &context.html_url, &context.actor);
    info!(
        "Rejecting request from {} on {}: {:?}",
        context.actor, context.change, rejection
    );
    ctx.execute(vec![Effect::CreateComment { body }]).await?;
    Ok(Outcome::Rejected(rejection))
}

/// Bot identity and comments for pruning. Both are optional: pruning is
/// best-effort.
async fn bot_and_comments(
    store: &dyn ChangeStore,
    change: &ChangeId,
) -> (Option<String>, Vec<Comment>) {
    match store.bot_identity().await {
        Ok(bot) => {
            let comments = or_default(store.list_comments().await, "comments", change);
            (Some(bot), comments)
        }
        Err(err) => {
            warn!("Failed to get bot identity for {}: {}", change, err);
            (None, vec![])
        }
    }
}

/// Treat a failed read as an empty view.
fn or_default<T: Default>(result: CapabilityResult<T>, what: &str, change: &ChangeId) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!("Failed to get {} for {}, continuing with none: {}", what, change, err);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CommentAction, CommentEvent, ReviewAction, ReviewEvent, ReviewVerdict};
    use crate::memory::{InMemoryChange, StaticOwners};
    use crate::merge_gate::{tree_hash_record, STALE_MARKER_NOTICE};
    use crate::respond::REVIEW_NOTIFICATION_TITLE;
    use crate::state::CommitSha;

    const BOT: &str = "mergegate[bot]";

    fn change_id() -> ChangeId {
        ChangeId::new("org", "repo", 10)
    }

    fn store() -> InMemoryChange {
        InMemoryChange::new(change_id(), BOT)
    }

    fn owners() -> StaticOwners {
        StaticOwners::new(OwnersSnapshot::new(
            ["r1", "r2", "c1"],
            ["c1"],
            2,
        ))
    }

    fn comment_event(actor: &str, body: &str) -> ChangeEvent {
        ChangeEvent::IssueComment(CommentEvent {
            action: CommentAction::Created,
            is_pull_request: true,
            is_open: true,
            context: ReviewContext {
                change: change_id(),
                actor: actor.to_string(),
                change_author: "author".to_string(),
                body: body.to_string(),
                html_url: "https://github.com/org/repo/pull/10#issuecomment-1".to_string(),
            },
        })
    }

    fn sync_event() -> ChangeEvent {
        ChangeEvent::PullRequest(PullRequestEvent {
            action: PullRequestAction::Synchronize,
            change: change_id(),
            merged: false,
            head_sha: CommitSha::from("head"),
        })
    }

    fn approval_settings() -> ApprovalSettings {
        ApprovalSettings {
            review_acts_as_lgtm: true,
            owners_link_base: "https://owners".to_string(),
        }
    }

    fn merge_settings(store_tree_hash: bool) -> MergeSettings {
        MergeSettings {
            store_tree_hash,
            owners_link_base: "https://owners".to_string(),
            trusted_committer: "web-flow".to_string(),
        }
    }

    async fn lgtm(store: &InMemoryChange, owners: &StaticOwners, event: ChangeEvent) -> Outcome {
        let ctx = HandlerContext {
            store,
            owners,
            dry_run: false,
        };
        handle_approval_event(&ctx, &approval_settings(), &event)
            .await
            .expect("approval handling should succeed")
    }

    async fn merge(
        store: &InMemoryChange,
        owners: &StaticOwners,
        settings: &MergeSettings,
        event: ChangeEvent,
    ) -> Result<Outcome, GateError> {
        let ctx = HandlerContext {
            store,
            owners,
            dry_run: false,
        };
        handle_merge_event(&ctx, settings, &event).await
    }

    #[tokio::test]
    async fn test_grant_twice_at_threshold_is_idempotent() {
        let change = store();
        let owners = owners();
        change.set_labels(&["status/LGT2"]).await;

        let outcome = lgtm(&change, &owners, comment_event("r1", "/lgtm")).await;
        assert_eq!(outcome, Outcome::NoChange);
        assert_eq!(change.label_mutations(), 0);
        assert!(change.comments().await.is_empty());
    }

    #[tokio::test]
    async fn test_author_grant_is_rejected_without_mutation() {
        let change = store();
        let owners = owners();

        let outcome = lgtm(&change, &owners, comment_event("author", "/lgtm")).await;
        assert!(matches!(outcome, Outcome::Rejected(Rejection::SelfGrant { .. })));
        assert_eq!(change.label_mutations(), 0);

        let bodies = change.comment_bodies().await;
        assert_eq!(bodies.len(), 1, "exactly one rejection comment");
        assert!(bodies[0].starts_with("@author: you cannot `/lgtm` your own PR."));
    }

    #[tokio::test]
    async fn test_author_grant_rejected_even_when_owners_unavailable() {
        let change = store();
        let owners = StaticOwners::unavailable();
        let outcome = lgtm(&change, &owners, comment_event("author", "/lgtm")).await;
        assert!(matches!(outcome, Outcome::Rejected(_)));
    }

    #[tokio::test]
    async fn test_author_revoke_removes_label() {
        let change = store();
        let owners = owners();
        change.set_labels(&["status/LGT1"]).await;

        let outcome = lgtm(&change, &owners, comment_event("author", "/lgtm cancel")).await;
        assert!(matches!(outcome, Outcome::Applied(_)));
        assert!(change.labels().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_reviewer_grant_rejected_with_roster_link() {
        let change = store();
        let owners = owners();

        let outcome = lgtm(&change, &owners, comment_event("stranger", "/lgtm")).await;
        assert!(matches!(outcome, Outcome::Rejected(Rejection::GrantNotInRole { .. })));
        assert_eq!(change.label_mutations(), 0);
        let bodies = change.comment_bodies().await;
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("https://owners/repos/org/repo/pulls/10/owners"));
    }

    #[tokio::test]
    async fn test_non_reviewer_revoke_rejected() {
        let change = store();
        let owners = owners();
        change.set_labels(&["status/LGT1"]).await;

        let outcome = lgtm(&change, &owners, comment_event("stranger", "/lgtm cancel")).await;
        assert!(matches!(outcome, Outcome::Rejected(Rejection::RevokeNotInRole { .. })));
        assert_eq!(change.labels().await, vec!["status/LGT1".to_string()]);
    }

    #[tokio::test]
    async fn test_owners_failure_aborts() {
        let change = store();
        let owners = StaticOwners::unavailable();
        let ctx = HandlerContext {
            store: &change,
            owners: &owners,
            dry_run: false,
        };
        let result =
            handle_approval_event(&ctx, &approval_settings(), &comment_event("r1", "/lgtm")).await;
        assert!(matches!(result, Err(GateError::Owners { .. })));
        assert_eq!(change.label_mutations(), 0);
    }

    #[tokio::test]
    async fn test_label_read_failure_treated_as_no_label() {
        let change = store();
        let owners = owners();
        change.fail_next("fetch_labels").await;

        lgtm(&change, &owners, comment_event("r1", "/lgtm")).await;
        assert_eq!(change.labels().await, vec!["status/LGT1".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_removal_aborts_before_add() {
        let change = store();
        let owners = owners();
        change.set_labels(&["status/LGT1"]).await;
        change.fail_next("remove_label").await;

        let ctx = HandlerContext {
            store: &change,
            owners: &owners,
            dry_run: false,
        };
        let result =
            handle_approval_event(&ctx, &approval_settings(), &comment_event("r2", "/lgtm")).await;
        assert!(matches!(result, Err(GateError::Mutation { .. })));
        assert_eq!(change.labels().await, vec!["status/LGT1".to_string()]);
    }

    #[tokio::test]
    async fn test_review_notification_tracks_reviewers() {
        let change = store();
        let owners = owners();

        lgtm(&change, &owners, comment_event("r1", "/lgtm")).await;
        lgtm(&change, &owners, comment_event("r2", "/lgtm")).await;

        let comments = change.comments().await;
        let notifications: Vec<&Comment> = comments
            .iter()
            .filter(|c| c.body.starts_with(REVIEW_NOTIFICATION_TITLE))
            .collect();
        assert_eq!(notifications.len(), 1, "older notifications are replaced");
        assert!(notifications[0].body.contains("- r1\n- r2\n"));
    }

    #[tokio::test]
    async fn test_review_notification_skips_repeat_reviewer() {
        let change = store();
        let owners = StaticOwners::new(OwnersSnapshot::new(["r1", "r2"], ["c1"], 3));

        lgtm(&change, &owners, comment_event("r1", "/lgtm")).await;
        let before = change.comments().await;
        lgtm(&change, &owners, comment_event("r1", "/lgtm")).await;

        // Label still advances, the notification stays put.
        assert_eq!(change.labels().await, vec!["status/LGT2".to_string()]);
        assert_eq!(change.comments().await, before);
    }

    #[tokio::test]
    async fn test_revoke_resets_notification() {
        let change = store();
        let owners = owners();

        lgtm(&change, &owners, comment_event("r1", "/lgtm")).await;
        lgtm(&change, &owners, comment_event("r1", "/lgtm cancel")).await;

        let bodies = change.comment_bodies().await;
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("This pull request has not been reviewed."));
    }

    #[tokio::test]
    async fn test_approving_review_grants() {
        let change = store();
        let owners = owners();
        let event = ChangeEvent::Review(ReviewEvent {
            action: ReviewAction::Submitted,
            verdict: ReviewVerdict::Approved,
            context: ReviewContext {
                change: change_id(),
                actor: "r1".to_string(),
                change_author: "author".to_string(),
                body: String::new(),
                html_url: String::new(),
            },
        });

        lgtm(&change, &owners, event).await;
        assert_eq!(change.labels().await, vec!["status/LGT1".to_string()]);
    }

    #[tokio::test]
    async fn test_opened_posts_initial_notification() {
        let change = store();
        let owners = owners();
        let event = ChangeEvent::PullRequest(PullRequestEvent {
            action: PullRequestAction::Opened,
            change: change_id(),
            merged: false,
            head_sha: CommitSha::from("a"),
        });

        lgtm(&change, &owners, event).await;
        let bodies = change.comment_bodies().await;
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].starts_with(REVIEW_NOTIFICATION_TITLE));
    }

    #[tokio::test]
    async fn test_merge_rejected_when_unsatisfied() {
        let change = store();
        let owners = owners();
        change.set_labels(&["status/LGT1"]).await;

        let outcome = merge(&change, &owners, &merge_settings(true), comment_event("c1", "/merge"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Rejected(Rejection::InsufficientApprovals { required: 2 })
        );
        assert!(!change.has_label(MERGE_MARKER).await);
        assert!(change.comment_bodies().await[0]
            .contains("adding 'status/can-merge' to this PR must have 2 LGTMs"));
    }

    #[tokio::test]
    async fn test_merge_by_author_rejected() {
        let change = store();
        let owners = owners();
        change.set_labels(&["status/LGT2"]).await;

        let outcome = merge(&change, &owners, &merge_settings(false), comment_event("author", "/merge"))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Rejected(Rejection::SelfGrant { .. })));
        assert!(!change.has_label(MERGE_MARKER).await);
    }

    #[tokio::test]
    async fn test_merge_by_reviewer_without_commit_rights_rejected() {
        let change = store();
        let owners = owners();
        change.set_labels(&["status/LGT2"]).await;

        let outcome = merge(&change, &owners, &merge_settings(false), comment_event("r1", "/merge"))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Rejected(Rejection::GrantNotInRole { .. })));
    }

    #[tokio::test]
    async fn test_merge_grant_records_tree_hash_and_prunes_notice() {
        let change = store();
        let owners = owners();
        change.set_labels(&["status/LGT2"]).await;
        change.push_commit("aaa", Some("dev")).await;
        change.push_commit("bbb", Some("dev")).await;
        change.push_comment(BOT, STALE_MARKER_NOTICE).await;

        merge(&change, &owners, &merge_settings(true), comment_event("c1", "/merge"))
            .await
            .unwrap();

        assert!(change.has_label(MERGE_MARKER).await);
        assert_eq!(
            change.comment_bodies().await,
            vec![tree_hash_record(&CommitSha::from("bbb"))]
        );
    }

    #[tokio::test]
    async fn test_merge_regrant_supersedes_old_record() {
        let change = store();
        let owners = owners();
        change.set_labels(&["status/LGT2"]).await;
        change.push_commit("new", Some("dev")).await;
        change.push_comment(BOT, &tree_hash_record(&CommitSha::from("old"))).await;

        merge(&change, &owners, &merge_settings(true), comment_event("c1", "/merge"))
            .await
            .unwrap();

        assert_eq!(
            change.comment_bodies().await,
            vec![tree_hash_record(&CommitSha::from("new"))]
        );
    }

    #[tokio::test]
    async fn test_merge_cancel_prunes_records() {
        let change = store();
        let owners = owners();
        change.set_labels(&["status/LGT2", MERGE_MARKER]).await;
        change.push_comment(BOT, &tree_hash_record(&CommitSha::from("aaa"))).await;
        change.push_comment("c1", "hello").await;

        merge(&change, &owners, &merge_settings(true), comment_event("author", "/merge cancel"))
            .await
            .unwrap();

        assert!(!change.has_label(MERGE_MARKER).await);
        assert_eq!(change.comment_bodies().await, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_without_marker_is_noop() {
        let change = store();
        let owners = owners();
        let outcome = merge(&change, &owners, &merge_settings(true), sync_event())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::NoChange);
        assert!(change.comments().await.is_empty());
    }

    #[tokio::test]
    async fn test_sync_without_persistence_removes_marker() {
        let change = store();
        let owners = owners();
        change.set_labels(&[MERGE_MARKER]).await;
        change.push_commit("aaa", Some("web-flow")).await;

        merge(&change, &owners, &merge_settings(false), sync_event())
            .await
            .unwrap();
        assert!(!change.has_label(MERGE_MARKER).await);
        assert_eq!(change.comment_bodies().await, vec![STALE_MARKER_NOTICE.to_string()]);
    }

    #[tokio::test]
    async fn test_sync_with_edited_record_removes_marker() {
        let change = store();
        let owners = owners();
        change.set_labels(&[MERGE_MARKER]).await;
        change.push_commit("aaa", Some("dev")).await;
        change.push_commit("bbb", Some("web-flow")).await;
        let id = change.push_comment(BOT, &tree_hash_record(&CommitSha::from("aaa"))).await;
        change
            .edit_comment(id, &tree_hash_record(&CommitSha::from("aaa")))
            .await;

        merge(&change, &owners, &merge_settings(true), sync_event())
            .await
            .unwrap();
        assert!(!change.has_label(MERGE_MARKER).await, "edited records are not trusted");
    }

    #[tokio::test]
    async fn test_sync_record_missing_from_history_keeps_marker_after_trusted_tail() {
        let change = store();
        let owners = owners();
        change.set_labels(&[MERGE_MARKER]).await;
        change.push_comment(BOT, &tree_hash_record(&CommitSha::from("force-pushed"))).await;
        change.push_commit("x", Some("dev")).await;
        change.push_commit("y", Some("web-flow")).await;

        // Unknown recorded hash falls back to the first commit; only `y` is inspected.
        let outcome = merge(&change, &owners, &merge_settings(true), sync_event())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::NoChange);
        assert!(change.has_label(MERGE_MARKER).await);
        assert_eq!(change.comments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_record_missing_from_history_removes_marker_after_human_commit() {
        let change = store();
        let owners = owners();
        change.set_labels(&[MERGE_MARKER]).await;
        change.push_comment(BOT, &tree_hash_record(&CommitSha::from("force-pushed"))).await;
        change.push_commit("x", Some("web-flow")).await;
        change.push_commit("y", Some("dev")).await;

        let outcome = merge(&change, &owners, &merge_settings(true), sync_event())
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Applied(_)));
        assert!(!change.has_label(MERGE_MARKER).await);
        let notices: Vec<String> = change
            .comment_bodies()
            .await
            .into_iter()
            .filter(|b| b == STALE_MARKER_NOTICE)
            .collect();
        assert_eq!(notices.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_commit_read_failure_keeps_marker() {
        let change = store();
        let owners = owners();
        change.set_labels(&[MERGE_MARKER]).await;
        change.push_commit("aaa", Some("dev")).await;
        change.push_commit("bbb", Some("dev")).await;
        change.push_comment(BOT, &tree_hash_record(&CommitSha::from("aaa"))).await;
        change.fail_next("fetch_commits").await;

        let outcome = merge(&change, &owners, &merge_settings(true), sync_event())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::NoChange);
        assert!(change.has_label(MERGE_MARKER).await);
        assert_eq!(
            change.comment_bodies().await,
            vec![tree_hash_record(&CommitSha::from("aaa"))]
        );
    }

    #[tokio::test]
    async fn test_zero_approval_threshold_aborts_merge() {
        let change = store();
        let owners = StaticOwners::new(OwnersSnapshot::new(
            Vec::<String>::new(),
            vec!["c1".to_string()],
            0,
        ));

        let result =
            merge(&change, &owners, &merge_settings(false), comment_event("c1", "/merge")).await;
        assert!(matches!(result, Err(GateError::Owners { .. })));
        assert!(!change.has_label(MERGE_MARKER).await);
        assert_eq!(change.label_mutations(), 0);
    }

    #[tokio::test]
    async fn test_zero_approval_threshold_aborts_lgtm() {
        let change = store();
        let owners = StaticOwners::new(OwnersSnapshot::new(["r1"], ["c1"], 0));
        let ctx = HandlerContext {
            store: &change,
            owners: &owners,
            dry_run: false,
        };
        let result =
            handle_approval_event(&ctx, &approval_settings(), &comment_event("r1", "/lgtm")).await;
        assert!(matches!(result, Err(GateError::Owners { .. })));
        assert_eq!(change.label_mutations(), 0);
    }

    #[tokio::test]
    async fn test_merge_command_in_review_body_grants() {
        let change = store();
        let owners = owners();
        change.set_labels(&["status/LGT2"]).await;
        let event = ChangeEvent::Review(ReviewEvent {
            action: ReviewAction::Submitted,
            verdict: ReviewVerdict::Commented,
            context: ReviewContext {
                change: change_id(),
                actor: "c1".to_string(),
                change_author: "author".to_string(),
                body: "/merge".to_string(),
                html_url: String::new(),
            },
        });

        merge(&change, &owners, &merge_settings(false), event)
            .await
            .unwrap();
        assert!(change.has_label(MERGE_MARKER).await);
    }

    #[tokio::test]
    async fn test_sync_on_merged_change_is_ignored() {
        let change = store();
        let owners = owners();
        change.set_labels(&[MERGE_MARKER]).await;
        let event = ChangeEvent::PullRequest(PullRequestEvent {
            action: PullRequestAction::Synchronize,
            change: change_id(),
            merged: true,
            head_sha: CommitSha::from("head"),
        });

        let outcome = merge(&change, &owners, &merge_settings(false), event)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert!(change.has_label(MERGE_MARKER).await);
    }

    #[tokio::test]
    async fn test_sync_bot_identity_failure_aborts() {
        let change = store();
        let owners = owners();
        change.set_labels(&[MERGE_MARKER]).await;
        change.fail_next("bot_identity").await;

        let result = merge(&change, &owners, &merge_settings(true), sync_event()).await;
        assert!(matches!(result, Err(GateError::Identity(_))));
        assert!(change.has_label(MERGE_MARKER).await);
    }

    #[tokio::test]
    async fn test_dry_run_reads_but_does_not_write() {
        let change = store();
        let owners = owners();
        let ctx = HandlerContext {
            store: &change,
            owners: &owners,
            dry_run: true,
        };
        let outcome =
            handle_approval_event(&ctx, &approval_settings(), &comment_event("r1", "/lgtm"))
                .await
                .unwrap();
        assert!(matches!(outcome, Outcome::Applied(_)));
        assert!(change.labels().await.is_empty());
        assert!(change.comments().await.is_empty());
    }
}
