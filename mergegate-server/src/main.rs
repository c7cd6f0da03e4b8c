use anyhow::Result;
use axum::{
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use mergegate_core::command::{APPROVAL_COMMANDS, MERGE_COMMANDS};
use mergegate_core::merge_gate::MERGE_MARKER;
use mergegate_core::respond::approval_label_pattern;
use mergegate_server::config::Config;
use mergegate_server::github::GitHubClient;
use mergegate_server::middleware::create_http_client;
use mergegate_server::webhook::webhook_router;
use mergegate_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "mergegate"
    })))
}

async fn help_handler(headers: HeaderMap) -> Response {
    let accept = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json");

    if accept.to_lowercase().contains("text/html") {
        return Html(generate_help_html()).into_response();
    }

    let version = mergegate_server::get_bot_version();
    let json_data = json!({
        "service": "mergegate",
        "version": version,
        "description": "Review approval and merge gating for pull requests",
        "endpoints": [
            {
                "path": "/health",
                "method": "GET",
                "description": "Health check endpoint",
                "authentication": "None",
                "response_format": "application/json"
            },
            {
                "path": "/webhook",
                "method": "POST",
                "description": "GitHub webhook receiver for comment, review and pull request events",
                "authentication": "GitHub webhook signature (X-Hub-Signature-256)",
                "response_format": "application/json"
            },
            {
                "path": "/help",
                "method": "GET",
                "description": "API documentation and service information",
                "authentication": "None",
                "response_format": "Supports content negotiation (JSON/HTML)"
            }
        ],
        "commands": {
            "lgtm": {
                "grant": APPROVAL_COMMANDS.grant_verb(),
                "revoke": APPROVAL_COMMANDS.revoke_verb(),
                "who": "Reviewers grant; reviewers or the PR author revoke",
                "labels": approval_label_pattern()
            },
            "merge": {
                "grant": MERGE_COMMANDS.grant_verb(),
                "revoke": MERGE_COMMANDS.revoke_verb(),
                "who": "Committers grant once the required LGTMs are present; committers or the PR author revoke",
                "labels": MERGE_MARKER
            }
        },
        "configuration": {
            "required_env_vars": [
                "GITHUB_APP_ID",
                "GITHUB_PRIVATE_KEY",
                "GITHUB_WEBHOOK_SECRET"
            ],
            "optional_env_vars": [
                "PORT (default: 3000)",
                "GITHUB_API_URL (default: https://api.github.com)",
                "PLUGIN_CONFIG (path to the per-repository plugin YAML)",
                "DRY_RUN (default: false)"
            ]
        }
    });

    Json(json_data).into_response()
}

fn generate_help_html() -> String {
    const HELP_HTML_TEMPLATE: &str = include_str!("help.html");
    HELP_HTML_TEMPLATE
        .replace("{version}", &mergegate_server::get_bot_version())
        .replace("{lgtm_grant}", APPROVAL_COMMANDS.grant_verb())
        .replace("{lgtm_revoke}", APPROVAL_COMMANDS.revoke_verb())
        .replace("{merge_grant}", MERGE_COMMANDS.grant_verb())
        .replace("{merge_revoke}", MERGE_COMMANDS.revoke_verb())
        .replace("{approval_labels}", &approval_label_pattern())
        .replace("{merge_marker}", MERGE_MARKER)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting mergegate");

    let config =
        Config::from_env().expect("Failed to load configuration from environment variables");
    let plugins = config
        .load_plugins()
        .expect("Failed to load plugin configuration");
    info!(
        "Loaded plugin configuration: {} lgtm entries, {} merge entries",
        plugins.lgtm.len(),
        plugins.merge.len()
    );
    if config.dry_run {
        info!("Dry-run mode: no labels or comments will be written");
    }

    let github_client = GitHubClient::new(
        config.github_app_id,
        config.github_private_key.clone(),
        config.github_api_url.clone(),
    );

    let app_state = Arc::new(AppState {
        github_client: Arc::new(github_client),
        http_client: create_http_client(),
        webhook_secret: config.github_webhook_secret.clone(),
        plugins,
        dry_run: config.dry_run,
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/help", get(help_handler))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
