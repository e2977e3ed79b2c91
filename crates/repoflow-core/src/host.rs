//! The external collaborator boundary.
//!
//! [`VcsHost`] performs every side effect (checkout, comments, merges,
//! commands); [`EventSource`] delivers raw events. The core never talks to a
//! network or a shell directly.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::envelope::{RawEvent, Repository};
use crate::error::VcsError;

/// A checked-out working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingTree {
    pub path: PathBuf,
    pub git_ref: String,
    pub writable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Merge,
    Squash,
    Rebase,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Merge => "merge",
            MergeStrategy::Squash => "squash",
            MergeStrategy::Rebase => "rebase",
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(MergeStrategy::Merge),
            "squash" => Ok(MergeStrategy::Squash),
            "rebase" => Ok(MergeStrategy::Rebase),
            other => Err(format!("unknown merge strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub merged: bool,
    pub sha: Option<String>,
    pub message: String,
}

/// A shell command to run, optionally inside a working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub run: String,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Pull request metadata as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestMetadata {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub labels: Vec<String>,
    pub mergeable: Option<bool>,
    pub head_sha: Option<String>,
}

/// VCS hosting capabilities consumed by the built-in actions.
///
/// Implementations must not retry on their own behalf unless that is their
/// documented policy; the core never retries.
#[async_trait]
pub trait VcsHost: Send + Sync {
    /// Check out `git_ref`. The tree must refuse pushes unless `writable`.
    async fn checkout_ref(
        &self,
        repo: &Repository,
        git_ref: &str,
        writable: bool,
    ) -> Result<WorkingTree, VcsError>;

    async fn post_comment(
        &self,
        repo: &Repository,
        issue_number: u64,
        body: &str,
    ) -> Result<CommentId, VcsError>;

    /// Fails with [`VcsError::MergeConflict`] or [`VcsError::ChecksNotPassed`]
    /// when the host refuses the merge.
    async fn merge_pull_request(
        &self,
        repo: &Repository,
        number: u64,
        strategy: MergeStrategy,
    ) -> Result<MergeResult, VcsError>;

    async fn run_command(&self, command: &CommandSpec) -> Result<CommandOutput, VcsError>;

    async fn pull_request(
        &self,
        repo: &Repository,
        number: u64,
    ) -> Result<PullRequestMetadata, VcsError>;

    /// Dispose of a tree returned by [`checkout_ref`](Self::checkout_ref).
    /// Called once per tree when its job ends, whatever the outcome.
    async fn release_tree(&self, _tree: &WorkingTree) -> Result<(), VcsError> {
        Ok(())
    }
}

/// Delivers raw events; `Ok(None)` means the source is exhausted.
#[async_trait]
pub trait EventSource: Send {
    async fn fetch_event(&mut self) -> Result<Option<RawEvent>, VcsError>;
}

/// Newline-delimited JSON [`RawEvent`]s read from any async reader.
///
/// Blank lines are skipped. A line that fails to decode yields
/// [`VcsError::Decode`]; the source stays usable afterwards.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for JsonLinesSource<R> {
    async fn fetch_event(&mut self) -> Result<Option<RawEvent>, VcsError> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map(Some)
                .map_err(|e| VcsError::Decode(e.to_string()));
        }
        Ok(None)
    }
}
