//! Minimal GitHub REST client: comments, merges, pull request metadata.

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use repoflow_core::{CommentId, MergeResult, MergeStrategy, PullRequestMetadata, VcsError};

use crate::config::GitHubConfig;

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("repoflow/", env!("CARGO_PKG_VERSION"));

fn http_error(err: reqwest::Error) -> VcsError {
    VcsError::Http {
        status: err.status().map(|s| s.as_u16()).unwrap_or(0),
        message: err.to_string(),
    }
}

/// Map a refused merge onto the error the actions understand.
fn merge_error(status: StatusCode, number: u64, message: String) -> VcsError {
    match status {
        StatusCode::METHOD_NOT_ALLOWED => VcsError::ChecksNotPassed { number, message },
        StatusCode::CONFLICT => VcsError::MergeConflict { number },
        StatusCode::NOT_FOUND => VcsError::NotFound(format!("pull request #{number}")),
        other => VcsError::Http {
            status: other.as_u16(),
            message,
        },
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CommentBody {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct MergeBody {
    merged: bool,
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Login {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Head {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullBody {
    number: u64,
    title: String,
    user: Login,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    mergeable: Option<bool>,
    head: Head,
}

impl From<PullBody> for PullRequestMetadata {
    fn from(body: PullBody) -> Self {
        PullRequestMetadata {
            number: body.number,
            title: body.title,
            author: body.user.login,
            labels: body.labels.into_iter().map(|l| l.name).collect(),
            mergeable: body.mergeable,
            head_sha: Some(body.head.sha),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    config: GitHubConfig,
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self, VcsError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(http_error)?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Error message from a non-2xx response body, falling back to the status.
    async fn error_message(response: Response) -> String {
        let status = response.status();
        match response.json::<ErrorBody>().await {
            Ok(body) if !body.message.is_empty() => body.message,
            _ => status.to_string(),
        }
    }

    async fn check(response: Response, what: &str) -> Result<Response, VcsError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = Self::error_message(response).await;
        warn!(status = status.as_u16(), %message, "GitHub rejected {}", what);
        Err(match status {
            StatusCode::NOT_FOUND => VcsError::NotFound(what.to_string()),
            other => VcsError::Http {
                status: other.as_u16(),
                message,
            },
        })
    }

    pub async fn create_comment(
        &self,
        full_name: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<CommentId, VcsError> {
        let url = self
            .config
            .repo_url(full_name, &format!("/issues/{issue_number}/comments"));
        debug!(%url, "Creating comment");
        let response = self
            .request(Method::POST, url)
            .json(&json!({ "body": body }))
            .send()
            .await
            .map_err(http_error)?;
        let created: CommentBody = Self::check(response, &format!("issue #{issue_number}"))
            .await?
            .json()
            .await
            .map_err(http_error)?;
        Ok(CommentId(created.id))
    }

    pub async fn merge_pull(
        &self,
        full_name: &str,
        number: u64,
        strategy: MergeStrategy,
    ) -> Result<MergeResult, VcsError> {
        let url = self.config.repo_url(full_name, &format!("/pulls/{number}/merge"));
        debug!(%url, strategy = strategy.as_str(), "Merging pull request");
        let response = self
            .request(Method::PUT, url)
            .json(&json!({ "merge_method": strategy.as_str() }))
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = Self::error_message(response).await;
            return Err(merge_error(status, number, message));
        }
        let merged: MergeBody = response.json().await.map_err(http_error)?;
        Ok(MergeResult {
            merged: merged.merged,
            sha: merged.sha,
            message: merged.message,
        })
    }

    pub async fn get_pull(
        &self,
        full_name: &str,
        number: u64,
    ) -> Result<PullRequestMetadata, VcsError> {
        let url = self.config.repo_url(full_name, &format!("/pulls/{number}"));
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(http_error)?;
        let pull: PullBody = Self::check(response, &format!("pull request #{number}"))
            .await?
            .json()
            .await
            .map_err(http_error)?;
        Ok(pull.into())
    }
}
