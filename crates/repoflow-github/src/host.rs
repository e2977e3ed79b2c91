//! [`VcsHost`] backed by the GitHub REST API and a local git binary.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use repoflow_core::{
    CommandOutput, CommandSpec, CommentId, MergeResult, MergeStrategy, PullRequestMetadata,
    Repository, VcsError, VcsHost, WorkingTree,
};

use crate::client::GitHubClient;
use crate::config::GitHubConfig;
use crate::process::{ProcessRunner, DISABLED_PUSH_URL};

pub struct GitHubHost {
    client: GitHubClient,
    runner: ProcessRunner,
}

impl GitHubHost {
    pub fn new(config: GitHubConfig) -> Result<Self, VcsError> {
        Ok(Self {
            client: GitHubClient::new(config)?,
            runner: ProcessRunner::new(),
        })
    }

    pub fn from_env() -> Result<Self, VcsError> {
        Self::new(GitHubConfig::from_env())
    }

    fn config(&self) -> &GitHubConfig {
        self.client.config()
    }

    /// Populate `dir` with a detached checkout of `git_ref`.
    async fn clone_into(
        &self,
        dir: &Path,
        full_name: &str,
        git_ref: &str,
        writable: bool,
    ) -> Result<(), VcsError> {
        let git = &self.runner;
        let config = self.config();
        git.git(dir, &["init", "--quiet"]).await?;
        git.git(dir, &["remote", "add", "origin", &config.public_url(full_name)])
            .await?;
        git.git(
            dir,
            &["fetch", "--quiet", "--depth", "1", &config.fetch_url(full_name), git_ref],
        )
        .await?;
        git.git(dir, &["checkout", "--quiet", "--detach", "FETCH_HEAD"])
            .await?;

        // Only writable trees get credentials, and only as a push URL; the
        // tree is deleted when its job ends.
        let push_url = if writable {
            config.fetch_url(full_name)
        } else {
            DISABLED_PUSH_URL.to_string()
        };
        git.git(dir, &["remote", "set-url", "--push", "origin", &push_url])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VcsHost for GitHubHost {
    async fn checkout_ref(
        &self,
        repo: &Repository,
        git_ref: &str,
        writable: bool,
    ) -> Result<WorkingTree, VcsError> {
        tokio::fs::create_dir_all(&self.config().workspace).await?;
        // A fresh directory per checkout, so concurrent jobs never share a
        // tree. Removed on drop until the checkout has fully succeeded, which
        // covers both errors and a step timeout cancelling this future.
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", repo.full_name.replace('/', "__")))
            .tempdir_in(&self.config().workspace)?;
        info!(repo = %repo.full_name, git_ref, writable, path = %dir.path().display(), "Checking out");

        self.clone_into(dir.path(), &repo.full_name, git_ref, writable)
            .await?;

        Ok(WorkingTree {
            path: dir.keep(),
            git_ref: git_ref.to_string(),
            writable,
        })
    }

    async fn release_tree(&self, tree: &WorkingTree) -> Result<(), VcsError> {
        if !tree.path.starts_with(&self.config().workspace) {
            return Err(VcsError::Other(format!(
                "refusing to remove {} outside the workspace",
                tree.path.display()
            )));
        }
        match tokio::fs::remove_dir_all(&tree.path).await {
            Ok(()) => {
                debug!(path = %tree.path.display(), "Removed working tree");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn post_comment(
        &self,
        repo: &Repository,
        issue_number: u64,
        body: &str,
    ) -> Result<CommentId, VcsError> {
        self.client
            .create_comment(&repo.full_name, issue_number, body)
            .await
    }

    async fn merge_pull_request(
        &self,
        repo: &Repository,
        number: u64,
        strategy: MergeStrategy,
    ) -> Result<MergeResult, VcsError> {
        let result = self.client.merge_pull(&repo.full_name, number, strategy).await?;
        info!(repo = %repo.full_name, number, merged = result.merged, "Merge attempted");
        Ok(result)
    }

    async fn run_command(&self, command: &CommandSpec) -> Result<CommandOutput, VcsError> {
        debug!(run = %command.run, cwd = ?command.cwd, "Running command");
        self.runner.run(command).await
    }

    async fn pull_request(
        &self,
        repo: &Repository,
        number: u64,
    ) -> Result<PullRequestMetadata, VcsError> {
        self.client.get_pull(&repo.full_name, number).await
    }
}
