//! Job definitions: trigger + predicate + permission scope + ordered steps.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{ActionRegistry, Params};
use crate::envelope::{EventEnvelope, EventKind};
use crate::error::ConfigError;
use crate::permission::PermissionScope;
use crate::predicate::{evaluate_counted, Predicate};

/// One step of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionStep {
    /// Display name; defaults to the action name.
    #[serde(default)]
    pub name: Option<String>,

    /// Registered action to invoke.
    pub uses: String,

    #[serde(default, rename = "with")]
    pub params: Params,

    /// A failure becomes a warning and the job continues.
    #[serde(default)]
    pub best_effort: bool,

    /// Overrides the dispatcher's default step timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ActionStep {
    pub fn new(uses: &str) -> Self {
        Self {
            name: None,
            uses: uses.to_string(),
            params: Params::new(),
            best_effort: false,
            timeout_secs: None,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.uses)
    }
}

/// A statically registered job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDefinition {
    pub name: String,

    /// Event kinds that trigger the job; empty means any kind.
    pub on: Vec<EventKind>,

    pub when: Predicate,

    pub permissions: PermissionScope,

    pub steps: Vec<ActionStep>,
}

impl JobDefinition {
    /// A job with no trigger restriction, an `Always` predicate and the
    /// default read-only scope.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            on: Vec::new(),
            when: Predicate::Always,
            permissions: PermissionScope::default(),
            steps: Vec::new(),
        }
    }

    pub fn on(mut self, kind: EventKind) -> Self {
        self.on.push(kind);
        self
    }

    pub fn when(mut self, predicate: Predicate) -> Self {
        self.when = predicate;
        self
    }

    pub fn permissions(mut self, scope: PermissionScope) -> Self {
        self.permissions = scope;
        self
    }

    pub fn step(mut self, step: ActionStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn is_triggered_by(&self, kind: EventKind) -> bool {
        self.on.is_empty() || self.on.contains(&kind)
    }

    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        self.evaluate(envelope).0
    }

    /// Match result plus the number of predicate nodes visited.
    pub(crate) fn evaluate(&self, envelope: &EventEnvelope) -> (bool, usize) {
        if !self.is_triggered_by(envelope.kind()) {
            return (false, 0);
        }
        evaluate_counted(&self.when, envelope)
    }

    /// Check the job against the actions available to it.
    pub fn validate(&self, registry: &ActionRegistry) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid(&self.name, "job name must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(ConfigError::invalid(&self.name, "job has no steps"));
        }
        self.when
            .validate()
            .map_err(|reason| ConfigError::invalid(&self.name, reason))?;

        let mut seen = HashSet::new();
        for step in &self.steps {
            let step_name = step.display_name();
            if !seen.insert(step_name) {
                return Err(ConfigError::invalid(
                    &self.name,
                    format!("duplicate step name '{step_name}'; give repeated actions a `name`"),
                ));
            }
            if step.timeout_secs == Some(0) {
                return Err(ConfigError::invalid(
                    &self.name,
                    format!("step '{step_name}': timeout_secs must be greater than zero"),
                ));
            }
            let action = registry.get(&step.uses).ok_or_else(|| {
                ConfigError::invalid(
                    &self.name,
                    format!(
                        "step '{step_name}' uses unknown action '{}' (available: {})",
                        step.uses,
                        registry.names().join(", ")
                    ),
                )
            })?;
            action
                .validate(&step.params)
                .map_err(|reason| ConfigError::invalid(&self.name, format!("step '{step_name}': {reason}")))?;
        }
        Ok(())
    }
}
