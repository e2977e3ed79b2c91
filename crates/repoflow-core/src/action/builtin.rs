//! Built-in actions backed by a [`VcsHost`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::envelope::EventEnvelope;
use crate::error::ActionError;
use crate::host::{CommandSpec, MergeStrategy, VcsHost};
use crate::permission::{AccessLevel, PermissionScope, Resource};
use crate::template;

use super::{required_str_param, str_param, Action, ActionInvocation, JobContext, Params};

fn invalid(action: &str, reason: String) -> ActionError {
    ActionError::InvalidParams {
        action: action.to_string(),
        reason,
    }
}

fn pull_request_number(action: &str, envelope: &EventEnvelope) -> Result<u64, ActionError> {
    envelope
        .pull_request()
        .map(|pr| pr.number)
        .ok_or_else(|| ActionError::execution(action, "event carries no pull request"))
}

// ---------------------------------------------------------------------------
// checkout
// ---------------------------------------------------------------------------

/// Check out a ref into a working tree.
///
/// `ref` is `base` (default), `head`, `default`, or a literal ref which may
/// contain placeholders. `base` falls back to the repository default branch
/// when the event does not carry one, as comment events never do.
pub struct CheckoutAction {
    host: Arc<dyn VcsHost>,
}

impl CheckoutAction {
    pub const NAME: &'static str = "checkout";

    pub fn new(host: Arc<dyn VcsHost>) -> Self {
        Self { host }
    }

    fn resolve_ref(spec: &str, envelope: &EventEnvelope) -> Result<String, String> {
        let pr = envelope.pull_request();
        let default_branch = || envelope.repository().default_branch.clone();
        let resolved = match spec {
            "base" => pr
                .and_then(|pr| pr.base_ref.clone())
                .unwrap_or_else(default_branch),
            "head" => pr
                .and_then(|pr| pr.head_ref.clone())
                .ok_or_else(|| "event carries no pull request head ref".to_string())?,
            "default" => default_branch(),
            literal => template::render(literal, envelope),
        };
        if resolved.trim().is_empty() {
            return Err(format!("ref `{spec}` resolved to an empty string"));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Action for CheckoutAction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn required_scope(&self, _invocation: &ActionInvocation<'_>) -> PermissionScope {
        PermissionScope::default().with(Resource::Contents, AccessLevel::Read)
    }

    fn validate(&self, params: &Params) -> Result<(), String> {
        match str_param(params, "ref")? {
            Some(spec) => template::validate(spec),
            None => Ok(()),
        }
    }

    async fn invoke(
        &self,
        invocation: &ActionInvocation<'_>,
        ctx: &mut JobContext,
    ) -> Result<Value, ActionError> {
        let spec = str_param(invocation.params, "ref")
            .map_err(|e| invalid(Self::NAME, e))?
            .unwrap_or("base");
        let git_ref = Self::resolve_ref(spec, invocation.envelope)
            .map_err(|e| ActionError::execution(Self::NAME, e))?;
        let writable = invocation
            .scope
            .allows(Resource::Contents, AccessLevel::Write);

        debug!(job = invocation.job, git_ref = %git_ref, writable, "Checking out ref");
        let tree = self
            .host
            .checkout_ref(invocation.envelope.repository(), &git_ref, writable)
            .await?;

        let output = json!({
            "ref": &tree.git_ref,
            "path": tree.path.to_string_lossy(),
            "writable": tree.writable,
        });
        ctx.attach_tree(Arc::clone(&self.host), tree);
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// post_comment
// ---------------------------------------------------------------------------

/// Post a comment on the event's issue or pull request.
///
/// `body` is required and may contain placeholders. `issue` overrides the
/// target number.
pub struct PostCommentAction {
    host: Arc<dyn VcsHost>,
}

impl PostCommentAction {
    pub const NAME: &'static str = "post_comment";

    pub fn new(host: Arc<dyn VcsHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Action for PostCommentAction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn required_scope(&self, invocation: &ActionInvocation<'_>) -> PermissionScope {
        let resource = if invocation.envelope.pull_request().is_some() {
            Resource::PullRequests
        } else {
            Resource::Issues
        };
        PermissionScope::default().with(resource, AccessLevel::Write)
    }

    fn validate(&self, params: &Params) -> Result<(), String> {
        template::validate(required_str_param(params, "body")?)?;
        match params.get("issue") {
            None => Ok(()),
            Some(v) if v.is_u64() => Ok(()),
            Some(other) => Err(format!("`issue` must be a positive number, got {other}")),
        }
    }

    async fn invoke(
        &self,
        invocation: &ActionInvocation<'_>,
        _ctx: &mut JobContext,
    ) -> Result<Value, ActionError> {
        let body = required_str_param(invocation.params, "body")
            .map_err(|e| invalid(Self::NAME, e))?;
        let body = template::render(body, invocation.envelope);
        let issue = invocation
            .params
            .get("issue")
            .and_then(Value::as_u64)
            .or_else(|| invocation.envelope.issue_number())
            .ok_or_else(|| {
                ActionError::execution(Self::NAME, "event has no issue or pull request to comment on")
            })?;

        let id = self
            .host
            .post_comment(invocation.envelope.repository(), issue, &body)
            .await?;
        Ok(json!({ "comment_id": id.0, "issue": issue }))
    }
}

// ---------------------------------------------------------------------------
// run_command
// ---------------------------------------------------------------------------

/// Run a shell command, inside the checked-out tree when there is one.
///
/// `run` must not contain placeholders: event data reaches the command only
/// through `env`, whose values may use them.
pub struct RunCommandAction {
    host: Arc<dyn VcsHost>,
}

impl RunCommandAction {
    pub const NAME: &'static str = "run_command";

    pub fn new(host: Arc<dyn VcsHost>) -> Self {
        Self { host }
    }

    fn env_param(params: &Params) -> Result<BTreeMap<String, String>, String> {
        match params.get("env") {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(key, value)| match value {
                    Value::String(s) => Ok((key.clone(), s.clone())),
                    other => Err(format!("env `{key}` must be a string, got {other}")),
                })
                .collect(),
            Some(other) => Err(format!("`env` must be a mapping, got {other}")),
        }
    }
}

#[async_trait]
impl Action for RunCommandAction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn required_scope(&self, _invocation: &ActionInvocation<'_>) -> PermissionScope {
        PermissionScope::default().with(Resource::Contents, AccessLevel::Read)
    }

    fn validate(&self, params: &Params) -> Result<(), String> {
        let run = required_str_param(params, "run")?;
        if template::has_placeholders(run) {
            return Err("`run` may not contain ${{ }} placeholders; pass event data through `env`".into());
        }
        Self::env_param(params)?
            .values()
            .try_for_each(|value| template::validate(value))
    }

    async fn invoke(
        &self,
        invocation: &ActionInvocation<'_>,
        ctx: &mut JobContext,
    ) -> Result<Value, ActionError> {
        let run = required_str_param(invocation.params, "run")
            .map_err(|e| invalid(Self::NAME, e))?;
        let env = Self::env_param(invocation.params)
            .map_err(|e| invalid(Self::NAME, e))?
            .into_iter()
            .map(|(key, value)| (key, template::render(&value, invocation.envelope)))
            .collect();
        let command = CommandSpec {
            run: run.to_string(),
            env,
            cwd: ctx.working_tree.as_ref().map(|tree| tree.path.clone()),
        };

        let output = self.host.run_command(&command).await?;
        if !output.success() {
            return Err(ActionError::execution(
                Self::NAME,
                format!("exited with code {}: {}", output.exit_code, output.stderr.trim()),
            ));
        }
        Ok(json!({ "exit_code": output.exit_code, "stdout": output.stdout }))
    }
}

// ---------------------------------------------------------------------------
// merge_pull_request
// ---------------------------------------------------------------------------

/// Merge the event's pull request with `strategy` (merge, squash, rebase).
pub struct MergePullRequestAction {
    host: Arc<dyn VcsHost>,
}

impl MergePullRequestAction {
    pub const NAME: &'static str = "merge_pull_request";

    pub fn new(host: Arc<dyn VcsHost>) -> Self {
        Self { host }
    }

    fn strategy(params: &Params) -> Result<MergeStrategy, String> {
        str_param(params, "strategy")?
            .map(str::parse::<MergeStrategy>)
            .transpose()
            .map(Option::unwrap_or_default)
    }
}

#[async_trait]
impl Action for MergePullRequestAction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn required_scope(&self, _invocation: &ActionInvocation<'_>) -> PermissionScope {
        PermissionScope::default()
            .with(Resource::Contents, AccessLevel::Write)
            .with(Resource::PullRequests, AccessLevel::Write)
    }

    fn validate(&self, params: &Params) -> Result<(), String> {
        Self::strategy(params).map(|_| ())
    }

    async fn invoke(
        &self,
        invocation: &ActionInvocation<'_>,
        _ctx: &mut JobContext,
    ) -> Result<Value, ActionError> {
        let strategy = Self::strategy(invocation.params).map_err(|e| invalid(Self::NAME, e))?;
        let number = pull_request_number(Self::NAME, invocation.envelope)?;

        let result = self
            .host
            .merge_pull_request(invocation.envelope.repository(), number, strategy)
            .await?;
        if !result.merged {
            return Err(ActionError::execution(Self::NAME, result.message));
        }
        Ok(json!({
            "merged": result.merged,
            "sha": result.sha,
            "strategy": strategy.as_str(),
        }))
    }
}

// ---------------------------------------------------------------------------
// pull_request_metadata
// ---------------------------------------------------------------------------

/// Fetch metadata (title, author, labels, mergeability) for the event's PR.
pub struct PullRequestMetadataAction {
    host: Arc<dyn VcsHost>,
}

impl PullRequestMetadataAction {
    pub const NAME: &'static str = "pull_request_metadata";

    pub fn new(host: Arc<dyn VcsHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Action for PullRequestMetadataAction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn required_scope(&self, _invocation: &ActionInvocation<'_>) -> PermissionScope {
        PermissionScope::default().with(Resource::PullRequests, AccessLevel::Read)
    }

    async fn invoke(
        &self,
        invocation: &ActionInvocation<'_>,
        _ctx: &mut JobContext,
    ) -> Result<Value, ActionError> {
        let number = pull_request_number(Self::NAME, invocation.envelope)?;
        let metadata = self
            .host
            .pull_request(invocation.envelope.repository(), number)
            .await?;
        serde_json::to_value(&metadata).map_err(|e| ActionError::execution(Self::NAME, e.to_string()))
    }
}
