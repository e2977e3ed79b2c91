//! Job files: the on-disk form of a set of job definitions.
//!
//! ```yaml
//! permissions:            # workflow-level default scope
//!   contents: read
//! defaults:
//!   step_timeout_secs: 300
//! jobs:
//!   - name: greet
//!     on: [comment_created]
//!     when:
//!       contains: { field: comment.body, value: "/hello" }
//!     permissions:        # replaces the workflow default entirely
//!       issues: write
//!     steps:
//!       - uses: post_comment
//!         with: { body: "Hello @${{ actor }}" }
//! ```
//!
//! Files ending in `.json` are parsed as JSON, anything else as YAML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::ActionRegistry;
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::envelope::EventKind;
use crate::error::ConfigError;
use crate::job::{ActionStep, JobDefinition};
use crate::permission::PermissionScope;
use crate::predicate::Predicate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
}

/// One job as written in a job file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub on: Vec<EventKind>,
    #[serde(default)]
    pub when: Predicate,
    /// `None` inherits the file-level scope.
    #[serde(default)]
    pub permissions: Option<PermissionScope>,
    pub steps: Vec<ActionStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    #[serde(default)]
    pub permissions: PermissionScope,
    #[serde(default)]
    pub defaults: Defaults,
    pub jobs: Vec<JobSpec>,
}

impl JobFile {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded job file");

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        match self.defaults.step_timeout_secs {
            Some(secs) => DispatcherConfig::default().with_step_timeout(Duration::from_secs(secs)),
            None => DispatcherConfig::default(),
        }
    }

    /// Resolve scope inheritance and produce the job definitions in file order.
    pub fn into_jobs(self) -> Vec<JobDefinition> {
        let default_scope = self.permissions;
        self.jobs
            .into_iter()
            .map(|spec| JobDefinition {
                name: spec.name,
                on: spec.on,
                when: spec.when,
                permissions: spec.permissions.unwrap_or_else(|| default_scope.clone()),
                steps: spec.steps,
            })
            .collect()
    }

    /// Build a dispatcher from this file, validating every job against
    /// `registry`.
    pub fn into_dispatcher(self, registry: ActionRegistry) -> Result<Dispatcher, ConfigError> {
        let config = self.dispatcher_config();
        Dispatcher::new(self.into_jobs(), registry, config)
    }
}
