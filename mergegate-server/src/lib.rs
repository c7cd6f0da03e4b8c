pub mod config;
pub mod github;
pub mod middleware;
pub mod owners;
pub mod store;
pub mod webhook;

use reqwest_middleware::ClientWithMiddleware;
use std::sync::Arc;

pub use config::{Config, PluginConfig};
pub use github::{GitHubClient, PullRequestInfo};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}

pub fn get_bot_version() -> String {
    // An explicitly supplied hash wins over git detection at build time.
    if let Some(git_hash) = option_env!("MERGEGATE_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        built_info::PKG_VERSION.to_string()
    }
}

pub struct AppState {
    pub github_client: Arc<GitHubClient>,
    /// Shared client for the owners service.
    pub http_client: ClientWithMiddleware,
    pub webhook_secret: String,
    pub plugins: PluginConfig,
    pub dry_run: bool,
}
