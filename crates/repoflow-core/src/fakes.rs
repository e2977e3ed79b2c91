//! In-memory fakes for the host traits (testing only)
//!
//! `MemoryVcsHost` records every call and can be told to fail a given
//! operation; `MemoryEventSource` replays a fixed queue of raw events.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::envelope::{RawEvent, Repository};
use crate::error::VcsError;
use crate::host::{
    CommandOutput, CommandSpec, CommentId, EventSource, MergeResult, MergeStrategy,
    PullRequestMetadata, VcsHost, WorkingTree,
};

// ---------------------------------------------------------------------------
// MemoryVcsHost
// ---------------------------------------------------------------------------

/// A recorded host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Checkout { git_ref: String, writable: bool },
    PostComment { issue: u64, body: String },
    Merge { number: u64, strategy: MergeStrategy },
    RunCommand { run: String },
    PullRequest { number: u64 },
}

impl HostCall {
    fn op(&self) -> HostOp {
        match self {
            HostCall::Checkout { .. } => HostOp::Checkout,
            HostCall::PostComment { .. } => HostOp::PostComment,
            HostCall::Merge { .. } => HostOp::Merge,
            HostCall::RunCommand { .. } => HostOp::RunCommand,
            HostCall::PullRequest { .. } => HostOp::PullRequest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    Checkout,
    PostComment,
    Merge,
    RunCommand,
    PullRequest,
}

/// How a failing operation misbehaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    MergeConflict,
    ChecksNotPassed,
    /// `run_command` returns normally with this exit code.
    ExitCode(i32),
    Error(String),
    /// Never completes.
    Hang,
}

/// In-memory VCS host. Calls are recorded before any fault applies.
#[derive(Debug, Default)]
pub struct MemoryVcsHost {
    calls: Mutex<Vec<HostCall>>,
    commands: Mutex<Vec<CommandSpec>>,
    faults: Mutex<HashMap<HostOp, Fault>>,
    released: Mutex<Vec<PathBuf>>,
    next_comment_id: AtomicU64,
}

impl MemoryVcsHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call to `op` misbehave as `fault`.
    pub fn fail(&self, op: HostOp, fault: Fault) {
        self.faults.lock().unwrap().insert(op, fault);
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: HostOp) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    /// `(issue, body)` of every posted comment, in order.
    pub fn comments(&self) -> Vec<(u64, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                HostCall::PostComment { issue, body } => Some((*issue, body.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().unwrap().clone()
    }

    /// Paths of released working trees, in release order. Not part of
    /// [`calls`](Self::calls).
    pub fn released(&self) -> Vec<PathBuf> {
        self.released.lock().unwrap().clone()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Apply the configured fault for `op`, if any. `ExitCode` is left to
    /// the caller.
    async fn check(&self, op: HostOp, number: u64) -> Result<Option<Fault>, VcsError> {
        let fault = self.faults.lock().unwrap().get(&op).cloned();
        match fault {
            None => Ok(None),
            Some(Fault::Hang) => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            Some(Fault::MergeConflict) => Err(VcsError::MergeConflict { number }),
            Some(Fault::ChecksNotPassed) => Err(VcsError::ChecksNotPassed {
                number,
                message: "required status checks have not passed".into(),
            }),
            Some(Fault::Error(message)) => Err(VcsError::Other(message)),
            Some(fault @ Fault::ExitCode(_)) => Ok(Some(fault)),
        }
    }
}

#[async_trait]
impl VcsHost for MemoryVcsHost {
    async fn checkout_ref(
        &self,
        repo: &Repository,
        git_ref: &str,
        writable: bool,
    ) -> Result<WorkingTree, VcsError> {
        self.record(HostCall::Checkout {
            git_ref: git_ref.to_string(),
            writable,
        });
        self.check(HostOp::Checkout, 0).await?;
        Ok(WorkingTree {
            path: PathBuf::from("/fake/worktrees").join(&repo.full_name),
            git_ref: git_ref.to_string(),
            writable,
        })
    }

    async fn post_comment(
        &self,
        _repo: &Repository,
        issue_number: u64,
        body: &str,
    ) -> Result<CommentId, VcsError> {
        self.record(HostCall::PostComment {
            issue: issue_number,
            body: body.to_string(),
        });
        self.check(HostOp::PostComment, issue_number).await?;
        Ok(CommentId(self.next_comment_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn merge_pull_request(
        &self,
        _repo: &Repository,
        number: u64,
        strategy: MergeStrategy,
    ) -> Result<MergeResult, VcsError> {
        self.record(HostCall::Merge { number, strategy });
        self.check(HostOp::Merge, number).await?;
        Ok(MergeResult {
            merged: true,
            sha: Some(format!("{number:040x}")),
            message: "Pull Request successfully merged".into(),
        })
    }

    async fn run_command(&self, command: &CommandSpec) -> Result<CommandOutput, VcsError> {
        self.record(HostCall::RunCommand {
            run: command.run.clone(),
        });
        self.commands.lock().unwrap().push(command.clone());
        let exit_code = match self.check(HostOp::RunCommand, 0).await? {
            Some(Fault::ExitCode(code)) => code,
            _ => 0,
        };
        Ok(CommandOutput {
            exit_code,
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("`{}` failed", command.run)
            },
        })
    }

    async fn pull_request(
        &self,
        _repo: &Repository,
        number: u64,
    ) -> Result<PullRequestMetadata, VcsError> {
        self.record(HostCall::PullRequest { number });
        self.check(HostOp::PullRequest, number).await?;
        Ok(PullRequestMetadata {
            number,
            title: format!("Pull request #{number}"),
            author: "dependabot[bot]".into(),
            labels: vec!["dependencies".into()],
            mergeable: Some(true),
            head_sha: Some(format!("{number:040x}")),
        })
    }

    async fn release_tree(&self, tree: &WorkingTree) -> Result<(), VcsError> {
        self.released.lock().unwrap().push(tree.path.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryEventSource
// ---------------------------------------------------------------------------

/// Replays queued events, then reports exhaustion.
#[derive(Debug, Default)]
pub struct MemoryEventSource {
    events: VecDeque<Result<RawEvent, String>>,
}

impl MemoryEventSource {
    pub fn new(events: impl IntoIterator<Item = RawEvent>) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect(),
        }
    }

    /// Queue an undecodable delivery.
    pub fn push_garbage(&mut self, reason: &str) {
        self.events.push_back(Err(reason.to_string()));
    }

    pub fn push(&mut self, event: RawEvent) {
        self.events.push_back(Ok(event));
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn fetch_event(&mut self) -> Result<Option<RawEvent>, VcsError> {
        match self.events.pop_front() {
            None => Ok(None),
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(reason)) => Err(VcsError::Decode(reason)),
        }
    }
}
