//! Connection settings for GitHub, read from the same variables GitHub
//! Actions exports.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_SERVER_URL: &str = "https://github.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// REST API base, `GITHUB_API_URL`.
    pub api_url: String,
    /// Git server base used for fetches, `GITHUB_SERVER_URL`.
    pub server_url: String,
    /// `GITHUB_TOKEN`; anonymous when unset.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Where working trees are created, `REPOFLOW_WORKSPACE`.
    pub workspace: PathBuf,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        GitHubConfig {
            api_url: std::env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            server_url: std::env::var("GITHUB_SERVER_URL")
                .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string()),
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
            workspace: std::env::var_os("REPOFLOW_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("repoflow")),
        }
    }
}

impl GitHubConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Explicit endpoints, no token, workspace under the system temp dir.
    pub fn new(api_url: &str, server_url: &str) -> Self {
        GitHubConfig {
            api_url: api_url.to_string(),
            server_url: server_url.to_string(),
            token: None,
            workspace: std::env::temp_dir().join("repoflow"),
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// `{api_url}/repos/{full_name}{suffix}`
    pub(crate) fn repo_url(&self, full_name: &str, suffix: &str) -> String {
        format!("{}/repos/{}{}", self.api_url.trim_end_matches('/'), full_name, suffix)
    }

    /// Fetch URL for `full_name`, with the token embedded when there is one.
    pub(crate) fn fetch_url(&self, full_name: &str) -> String {
        let base = self.server_url.trim_end_matches('/');
        match (&self.token, base.split_once("://")) {
            (Some(token), Some((scheme, host))) if scheme.starts_with("http") => {
                format!("{scheme}://x-access-token:{token}@{host}/{full_name}.git")
            }
            _ => self.public_url(full_name),
        }
    }

    /// Fetch URL without credentials, safe to store in `.git/config`.
    pub(crate) fn public_url(&self, full_name: &str) -> String {
        format!("{}/{}.git", self.server_url.trim_end_matches('/'), full_name)
    }
}
