use anyhow::{Context, Result};
use mergegate_core::merge_gate::DEFAULT_TRUSTED_COMMITTER;
use mergegate_core::{ApprovalSettings, MergeSettings};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Clone)]
pub struct Config {
    pub github_app_id: u64,
    pub github_private_key: String,
    pub github_webhook_secret: String,
    /// Base URL of the GitHub REST API, without a trailing slash.
    pub github_api_url: String,
    pub port: u16,
    /// Path to the per-repository plugin YAML. Without it no repository has
    /// a plugin enabled.
    pub plugin_config_path: Option<PathBuf>,
    pub dry_run: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_app_id = env::var("GITHUB_APP_ID")
            .context("GITHUB_APP_ID environment variable is required")?
            .parse::<u64>()
            .context("GITHUB_APP_ID must be a valid number")?;

        let github_private_key = env::var("GITHUB_PRIVATE_KEY")
            .context("GITHUB_PRIVATE_KEY environment variable is required")?
            .replace("\\n", "\n");

        let github_webhook_secret = env::var("GITHUB_WEBHOOK_SECRET")
            .context("GITHUB_WEBHOOK_SECRET environment variable is required")?;

        let github_api_url = env::var("GITHUB_API_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let plugin_config_path = env::var("PLUGIN_CONFIG")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let dry_run = parse_flag(env::var("DRY_RUN").ok());

        Ok(Config {
            github_app_id,
            github_private_key,
            github_webhook_secret,
            github_api_url,
            port,
            plugin_config_path,
            dry_run,
        })
    }

    /// Load the plugin configuration named by `PLUGIN_CONFIG`, if any.
    pub fn load_plugins(&self) -> Result<PluginConfig> {
        match &self.plugin_config_path {
            Some(path) => PluginConfig::load(path),
            None => Ok(PluginConfig::default()),
        }
    }
}

/// Parse a boolean environment flag. Anything but `true`/`1` is false.
pub fn parse_flag(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true") | Some("1")
    )
}

/// Approval plugin settings for a set of repositories.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LgtmConfig {
    /// Entries are either `org` or `org/repo`.
    pub repos: Vec<String>,
    pub pull_owners_endpoint: String,
    pub review_acts_as_lgtm: bool,
}

/// Merge plugin settings for a set of repositories.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MergeConfig {
    pub repos: Vec<String>,
    pub pull_owners_endpoint: String,
    pub store_tree_hash: bool,
}

trait RepoScoped: Clone + Default {
    fn repos(&self) -> &[String];
}

impl RepoScoped for LgtmConfig {
    fn repos(&self) -> &[String] {
        &self.repos
    }
}

impl RepoScoped for MergeConfig {
    fn repos(&self) -> &[String] {
        &self.repos
    }
}

/// Exact `org/repo` entries win over `org` entries.
fn find_entry<'a, T: RepoScoped>(entries: &'a [T], org: &str, repo: &str) -> Option<&'a T> {
    let full_name = format!("{}/{}", org, repo);
    entries
        .iter()
        .find(|e| e.repos().iter().any(|r| *r == full_name))
        .or_else(|| entries.iter().find(|e| e.repos().iter().any(|r| r == org)))
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PluginConfig {
    pub lgtm: Vec<LgtmConfig>,
    pub merge: Vec<MergeConfig>,
    /// Base of the roster links in replies. Defaults to the owners endpoint.
    pub owners_web_url: Option<String>,
    pub trusted_committer: Option<String>,
}

impl PluginConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plugin config {}", path.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("Failed to parse plugin config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).context("Invalid plugin configuration")
    }

    pub fn lgtm_for(&self, org: &str, repo: &str) -> LgtmConfig {
        find_entry(&self.lgtm, org, repo).cloned().unwrap_or_default()
    }

    pub fn merge_for(&self, org: &str, repo: &str) -> MergeConfig {
        find_entry(&self.merge, org, repo).cloned().unwrap_or_default()
    }

    /// Whether any `lgtm` entry covers the repository.
    pub fn lgtm_enabled(&self, org: &str, repo: &str) -> bool {
        find_entry(&self.lgtm, org, repo).is_some()
    }

    pub fn merge_enabled(&self, org: &str, repo: &str) -> bool {
        find_entry(&self.merge, org, repo).is_some()
    }

    pub fn trusted_committer(&self) -> &str {
        self.trusted_committer
            .as_deref()
            .unwrap_or(DEFAULT_TRUSTED_COMMITTER)
    }

    fn owners_link_base(&self, endpoint: &str) -> String {
        self.owners_web_url
            .clone()
            .unwrap_or_else(|| endpoint.to_string())
    }

    pub fn approval_settings(&self, org: &str, repo: &str) -> ApprovalSettings {
        let lgtm = self.lgtm_for(org, repo);
        ApprovalSettings {
            review_acts_as_lgtm: lgtm.review_acts_as_lgtm,
            owners_link_base: self.owners_link_base(&lgtm.pull_owners_endpoint),
        }
    }

    pub fn merge_settings(&self, org: &str, repo: &str) -> MergeSettings {
        let merge = self.merge_for(org, repo);
        MergeSettings {
            store_tree_hash: merge.store_tree_hash,
            owners_link_base: self.owners_link_base(&merge.pull_owners_endpoint),
            trusted_committer: self.trusted_committer().to_string(),
        }
    }
}
