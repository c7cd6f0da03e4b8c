//! End-to-end replay of a change going from no approvals to mergeable and
//! back, driven through the public handlers against an in-memory change.

use mergegate_core::event::{
    CommentAction, CommentEvent, PullRequestAction, PullRequestEvent,
};
use mergegate_core::memory::{InMemoryChange, StaticOwners};
use mergegate_core::merge_gate::{tree_hash_record, MERGE_MARKER, STALE_MARKER_NOTICE};
use mergegate_core::respond::REVIEW_NOTIFICATION_TITLE;
use mergegate_core::{
    handle_approval_event, handle_merge_event, ApprovalSettings, ChangeEvent, ChangeId, CommitSha,
    HandlerContext, MergeSettings, Outcome, OwnersSnapshot, ReviewContext,
};

const BOT: &str = "mergegate[bot]";

fn change_id() -> ChangeId {
    ChangeId::new("acme", "widgets", 42)
}

fn command(actor: &str, body: &str) -> ChangeEvent {
    ChangeEvent::IssueComment(CommentEvent {
        action: CommentAction::Created,
        is_pull_request: true,
        is_open: true,
        context: ReviewContext {
            change: change_id(),
            actor: actor.to_string(),
            change_author: "author".to_string(),
            body: body.to_string(),
            html_url: "https://github.com/acme/widgets/pull/42#issuecomment-1".to_string(),
        },
    })
}

fn synchronize(head: &str) -> ChangeEvent {
    ChangeEvent::PullRequest(PullRequestEvent {
        action: PullRequestAction::Synchronize,
        change: change_id(),
        merged: false,
        head_sha: CommitSha::from(head),
    })
}

fn approval_settings() -> ApprovalSettings {
    ApprovalSettings {
        review_acts_as_lgtm: false,
        owners_link_base: "https://owners.example".to_string(),
    }
}

fn merge_settings() -> MergeSettings {
    MergeSettings {
        store_tree_hash: true,
        owners_link_base: "https://owners.example".to_string(),
        trusted_committer: "web-flow".to_string(),
    }
}

fn non_notification_bodies(bodies: Vec<String>) -> Vec<String> {
    bodies
        .into_iter()
        .filter(|b| !b.starts_with(REVIEW_NOTIFICATION_TITLE))
        .collect()
}

#[tokio::test]
async fn test_change_lifecycle() {
    let change = InMemoryChange::new(change_id(), BOT);
    let owners = StaticOwners::new(OwnersSnapshot::new(["r1", "r2"], ["c1"], 2));
    let ctx = HandlerContext {
        store: &change,
        owners: &owners,
        dry_run: false,
    };
    change.push_commit("h", Some("dev")).await;

    // First approval.
    handle_approval_event(&ctx, &approval_settings(), &command("r1", "/lgtm"))
        .await
        .unwrap();
    assert_eq!(change.labels().await, vec!["status/LGT1".to_string()]);

    // Second approval replaces the first label.
    handle_approval_event(&ctx, &approval_settings(), &command("r2", "/lgtm"))
        .await
        .unwrap();
    assert_eq!(change.labels().await, vec!["status/LGT2".to_string()]);

    // Committer marks the change mergeable; the head commit is recorded.
    let outcome = handle_merge_event(&ctx, &merge_settings(), &command("c1", "/merge"))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Applied(_)));
    assert!(change.has_label(MERGE_MARKER).await);
    assert_eq!(
        non_notification_bodies(change.comment_bodies().await),
        vec![tree_hash_record(&CommitSha::from("h"))]
    );

    // A trusted update commit keeps the marker and posts nothing.
    let comments_before = change.comments().await;
    change.push_commit("u1", Some("web-flow")).await;
    let outcome = handle_merge_event(&ctx, &merge_settings(), &synchronize("u1"))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::NoChange);
    assert!(change.has_label(MERGE_MARKER).await);
    assert_eq!(change.comments().await, comments_before);

    // A human commit removes it with a single notice.
    change.push_commit("x1", Some("dev")).await;
    handle_merge_event(&ctx, &merge_settings(), &synchronize("x1"))
        .await
        .unwrap();
    assert!(!change.has_label(MERGE_MARKER).await);
    assert!(change.has_label("status/LGT2").await);
    let notices = change
        .comment_bodies()
        .await
        .into_iter()
        .filter(|b| b == STALE_MARKER_NOTICE)
        .count();
    assert_eq!(notices, 1);
}

#[tokio::test]
async fn test_regrant_after_stale_marker_prunes_notice() {
    let change = InMemoryChange::new(change_id(), BOT);
    let owners = StaticOwners::new(OwnersSnapshot::new(["r1"], ["c1"], 1));
    let ctx = HandlerContext {
        store: &change,
        owners: &owners,
        dry_run: false,
    };
    change.push_commit("a", Some("dev")).await;

    handle_approval_event(&ctx, &approval_settings(), &command("r1", "/lgtm"))
        .await
        .unwrap();
    handle_merge_event(&ctx, &merge_settings(), &command("c1", "/merge"))
        .await
        .unwrap();

    change.push_commit("b", Some("dev")).await;
    handle_merge_event(&ctx, &merge_settings(), &synchronize("b"))
        .await
        .unwrap();
    assert!(!change.has_label(MERGE_MARKER).await);

    handle_merge_event(&ctx, &merge_settings(), &command("c1", "/merge"))
        .await
        .unwrap();
    assert!(change.has_label(MERGE_MARKER).await);
    assert_eq!(
        non_notification_bodies(change.comment_bodies().await),
        vec![tree_hash_record(&CommitSha::from("b"))],
        "old record and stale notice are both gone"
    );
}
