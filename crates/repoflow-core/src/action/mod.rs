//! Actions: named, side-effecting operations a job step can invoke.
//!
//! Each action declares the [`PermissionScope`] it needs for a given
//! invocation; the dispatcher checks it against the job's scope before any
//! step runs. Implementations delegate the side effect itself to a
//! [`VcsHost`](crate::host::VcsHost).
//!
//! # Modules
//!
//! - [`registry`]: `ActionRegistry` (name → action)
//! - [`builtin`]: checkout, post_comment, run_command, merge_pull_request,
//!   pull_request_metadata

pub mod builtin;
pub mod registry;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope::EventEnvelope;
use crate::error::ActionError;
use crate::host::{VcsHost, WorkingTree};
use crate::permission::PermissionScope;

pub use builtin::{
    CheckoutAction, MergePullRequestAction, PostCommentAction, PullRequestMetadataAction,
    RunCommandAction,
};
pub use registry::ActionRegistry;

/// Step parameters (the `with:` mapping).
pub type Params = serde_json::Map<String, Value>;

/// Everything an action sees about the step it is running for.
#[derive(Debug, Clone, Copy)]
pub struct ActionInvocation<'a> {
    pub job: &'a str,
    pub step: &'a str,
    pub envelope: &'a EventEnvelope,
    pub params: &'a Params,
    /// The invoking job's declared scope.
    pub scope: &'a PermissionScope,
}

/// State carried between the steps of one job run.
#[derive(Default)]
pub struct JobContext {
    /// Set by `checkout`; commands run inside it.
    pub working_tree: Option<WorkingTree>,
    /// Outputs of completed steps, keyed by step name.
    pub outputs: BTreeMap<String, Value>,
    /// Every tree checked out during the run, with the host that owns it.
    leases: Vec<(Arc<dyn VcsHost>, WorkingTree)>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("working_tree", &self.working_tree)
            .field("outputs", &self.outputs)
            .field("leased_trees", &self.leases.len())
            .finish()
    }
}

impl JobContext {
    /// Make `tree` the current working tree and remember to hand it back to
    /// `host` when the job ends.
    pub fn attach_tree(&mut self, host: Arc<dyn VcsHost>, tree: WorkingTree) {
        self.working_tree = Some(tree.clone());
        self.leases.push((host, tree));
    }

    /// Release every attached tree. Failures are logged, not returned: the
    /// job's outcome is already decided.
    pub async fn release_trees(&mut self) {
        self.working_tree = None;
        for (host, tree) in self.leases.drain(..) {
            match host.release_tree(&tree).await {
                Ok(()) => debug!(path = %tree.path.display(), "Released working tree"),
                Err(e) => warn!(path = %tree.path.display(), error = %e, "Failed to release working tree"),
            }
        }
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// Minimum scope this invocation needs. Only explicit entries count.
    fn required_scope(&self, invocation: &ActionInvocation<'_>) -> PermissionScope;

    /// Static parameter check, run when jobs are registered.
    fn validate(&self, _params: &Params) -> Result<(), String> {
        Ok(())
    }

    async fn invoke(
        &self,
        invocation: &ActionInvocation<'_>,
        ctx: &mut JobContext,
    ) -> Result<Value, ActionError>;
}

/// Optional string parameter; present-but-not-a-string is an error.
pub(crate) fn str_param<'a>(params: &'a Params, key: &str) -> Result<Option<&'a str>, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(format!("`{key}` must be a string, got {other}")),
    }
}

pub(crate) fn required_str_param<'a>(params: &'a Params, key: &str) -> Result<&'a str, String> {
    str_param(params, key)?.ok_or_else(|| format!("missing required parameter `{key}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Params {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_str_param() {
        let p = params(json!({ "body": "hi", "n": 3, "empty": null }));
        assert_eq!(str_param(&p, "body").unwrap(), Some("hi"));
        assert_eq!(str_param(&p, "missing").unwrap(), None);
        assert_eq!(str_param(&p, "empty").unwrap(), None);
        assert!(str_param(&p, "n").is_err());
    }

    #[test]
    fn test_required_str_param() {
        let p = params(json!({ "run": "make" }));
        assert_eq!(required_str_param(&p, "run").unwrap(), "make");
        assert!(required_str_param(&p, "body")
            .unwrap_err()
            .contains("missing required parameter `body`"));
    }
}
