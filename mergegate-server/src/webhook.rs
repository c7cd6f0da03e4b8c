use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use mergegate_core::event::{
    CommentAction, CommentEvent, PullRequestAction, PullRequestEvent, ReviewAction, ReviewEvent,
    ReviewVerdict,
};
use mergegate_core::{
    handle_approval_event, handle_merge_event, ChangeEvent, ChangeId, CommitSha, GateError,
    HandlerContext, Outcome, ReviewContext,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::github::PullRequestInfo;
use crate::middleware::CorrelationId;
use crate::owners::HttpOwnersClient;
use crate::store::GitHubChange;
use crate::AppState;

pub const EVENT_HEADER: &str = "x-github-event";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubWebhookPayload {
    pub action: Option<String>,
    pub pull_request: Option<PullRequest>,
    pub repository: Option<Repository>,
    pub sender: Option<User>,
    pub installation: Option<Installation>,
    pub comment: Option<Comment>,
    pub issue: Option<Issue>,
    pub review: Option<Review>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub body: String,
    pub user: User,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub state: String,
    pub user: User,
    pub pull_request: Option<PullRequestLink>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestLink {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub state: String,
    pub merged: Option<bool>,
    pub user: User,
    pub head: PullRequestRef,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestRef {
    pub sha: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Review {
    pub id: u64,
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    pub user: User,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub login: String,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison.
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let correlation_id = CorrelationId::generate();

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let mut new_request = Request::from_parts(parts, axum::body::Body::from(bytes));
    new_request.extensions_mut().insert(correlation_id);

    Ok(next.run(new_request).await)
}

fn comment_action(action: Option<&str>) -> CommentAction {
    match action {
        Some("created") => CommentAction::Created,
        Some("edited") => CommentAction::Edited,
        Some("deleted") => CommentAction::Deleted,
        _ => CommentAction::Other,
    }
}

fn review_action(action: Option<&str>) -> ReviewAction {
    match action {
        Some("submitted") => ReviewAction::Submitted,
        Some("edited") => ReviewAction::Edited,
        Some("dismissed") => ReviewAction::Dismissed,
        _ => ReviewAction::Other,
    }
}

fn pull_request_action(action: Option<&str>) -> PullRequestAction {
    match action {
        Some("opened") => PullRequestAction::Opened,
        Some("reopened") => PullRequestAction::Reopened,
        Some("synchronize") => PullRequestAction::Synchronize,
        _ => PullRequestAction::Other,
    }
}

/// Translate a delivery into the engine's event type.
///
/// Returns `None` for event kinds the engine does not handle and for
/// payloads missing the fields the kind requires.
pub fn to_change_event(event_name: &str, payload: &GitHubWebhookPayload) -> Option<ChangeEvent> {
    let repo = payload.repository.as_ref()?;
    let action = payload.action.as_deref();
    let change_id = |number: u64| ChangeId::new(repo.owner.login.clone(), repo.name.clone(), number);

    match event_name {
        "issue_comment" => {
            let issue = payload.issue.as_ref()?;
            let comment = payload.comment.as_ref()?;
            Some(ChangeEvent::IssueComment(CommentEvent {
                action: comment_action(action),
                is_pull_request: issue.pull_request.is_some(),
                is_open: issue.state == "open",
                context: ReviewContext {
                    change: change_id(issue.number),
                    actor: comment.user.login.clone(),
                    change_author: issue.user.login.clone(),
                    body: comment.body.clone(),
                    html_url: comment.html_url.clone(),
                },
            }))
        }
        "pull_request_review_comment" => {
            let pr = payload.pull_request.as_ref()?;
            let comment = payload.comment.as_ref()?;
            Some(ChangeEvent::ReviewComment(CommentEvent {
                action: comment_action(action),
                is_pull_request: true,
                is_open: pr.state == "open",
                context: ReviewContext {
                    change: change_id(pr.number),
                    actor: comment.user.login.clone(),
                    change_author: pr.user.login.clone(),
                    body: comment.body.clone(),
                    html_url: comment.html_url.clone(),
                },
            }))
        }
        "pull_request_review" => {
            let pr = payload.pull_request.as_ref()?;
            let review = payload.review.as_ref()?;
            Some(ChangeEvent::Review(ReviewEvent {
                action: review_action(action),
                verdict: ReviewVerdict::parse(&review.state),
                context: ReviewContext {
                    change: change_id(pr.number),
                    actor: review.user.login.clone(),
                    change_author: pr.user.login.clone(),
                    body: review.body.clone().unwrap_or_default(),
                    html_url: review.html_url.clone(),
                },
            }))
        }
        "pull_request" => {
            let pr = payload.pull_request.as_ref()?;
            Some(ChangeEvent::PullRequest(PullRequestEvent {
                action: pull_request_action(action),
                change: change_id(pr.number),
                merged: pr.merged.unwrap_or(false),
                head_sha: CommitSha::from(pr.head.sha.as_str()),
            }))
        }
        _ => None,
    }
}

fn pull_request_info(payload: &GitHubWebhookPayload, change: &ChangeId) -> Option<PullRequestInfo> {
    Some(PullRequestInfo {
        installation_id: payload.installation.as_ref()?.id,
        repo_owner: change.org.clone(),
        repo_name: change.repo.clone(),
        pr_number: change.number,
    })
}

fn response(message: &str) -> Json<WebhookResponse> {
    Json(WebhookResponse {
        message: message.to_string(),
    })
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone());
    let event_name = request
        .headers()
        .get(EVENT_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    info!("Received {} webhook", event_name);

    let (_parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let payload: GitHubWebhookPayload =
        serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)?;

    let Some(event) = to_change_event(&event_name, &payload) else {
        return Ok(response("Event ignored"));
    };
    let change = event.change().clone();

    let Some(pr) = pull_request_info(&payload, &change) else {
        warn!("Webhook for {} has no installation, ignoring", change);
        return Ok(response("Event ignored"));
    };

    let lgtm_enabled = state.plugins.lgtm_enabled(&change.org, &change.repo);
    let merge_enabled = state.plugins.merge_enabled(&change.org, &change.repo);
    if !lgtm_enabled && !merge_enabled {
        info!("No plugins enabled for {}/{}, ignoring", change.org, change.repo);
        return Ok(response("Event ignored"));
    }

    info!("Processing {}", event.log_summary());

    if lgtm_enabled {
        let state = state.clone();
        let event = event.clone();
        let pr = pr.clone();
        let correlation_id = correlation_id.clone();
        tokio::spawn(async move {
            match process_approval(state, &event, pr, correlation_id).await {
                Ok(outcome) => info!("lgtm handled {}: {:?}", event.log_summary(), outcome),
                Err(e) => error!("Failed to process lgtm for {}: {}", event.log_summary(), e),
            }
        });
    }

    if merge_enabled {
        let state = state.clone();
        tokio::spawn(async move {
            match process_merge(state, &event, pr, correlation_id).await {
                Ok(outcome) => info!("merge handled {}: {:?}", event.log_summary(), outcome),
                Err(e) => error!("Failed to process merge for {}: {}", event.log_summary(), e),
            }
        });
    }

    Ok(response("Event accepted"))
}

async fn process_approval(
    state: Arc<AppState>,
    event: &ChangeEvent,
    pr: PullRequestInfo,
    correlation_id: Option<String>,
) -> Result<Outcome, GateError> {
    let settings = state.plugins.approval_settings(&pr.repo_owner, &pr.repo_name);
    let endpoint = state
        .plugins
        .lgtm_for(&pr.repo_owner, &pr.repo_name)
        .pull_owners_endpoint;

    let owners = HttpOwnersClient::new(state.http_client.clone(), endpoint, correlation_id.clone());
    let store = GitHubChange::new(state.github_client.clone(), pr, correlation_id);
    let ctx = HandlerContext {
        store: &store,
        owners: &owners,
        dry_run: state.dry_run,
    };
    handle_approval_event(&ctx, &settings, event).await
}

async fn process_merge(
    state: Arc<AppState>,
    event: &ChangeEvent,
    pr: PullRequestInfo,
    correlation_id: Option<String>,
) -> Result<Outcome, GateError> {
    let settings = state.plugins.merge_settings(&pr.repo_owner, &pr.repo_name);
    let endpoint = state
        .plugins
        .merge_for(&pr.repo_owner, &pr.repo_name)
        .pull_owners_endpoint;

    let owners = HttpOwnersClient::new(state.http_client.clone(), endpoint, correlation_id.clone());
    let store = GitHubChange::new(state.github_client.clone(), pr, correlation_id);
    let ctx = HandlerContext {
        store: &store,
        owners: &owners,
        dry_run: state.dry_run,
    };
    handle_merge_event(&ctx, &settings, event).await
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}
