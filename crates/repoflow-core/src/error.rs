//! Error taxonomy for repoflow.

use std::path::PathBuf;

use crate::permission::ScopeShortfall;

/// Errors produced while normalizing a raw event into an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed {event} event: missing required field `{field}`")]
    Malformed { event: String, field: String },

    #[error("unsupported event: {event} (action: {action})")]
    Unsupported { event: String, action: String },
}

impl EnvelopeError {
    /// Whether the event was well formed but not one the dispatcher handles.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, EnvelopeError::Unsupported { .. })
    }
}

/// Errors reported by the VCS hosting collaborator.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("merge conflict on pull request #{number}")]
    MergeConflict { number: u64 },

    #[error("checks not passed for pull request #{number}: {message}")]
    ChecksNotPassed { number: u64, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("could not decode event: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors produced while running a single action step.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("permission denied for action '{action}': {}", format_shortfall(.shortfall))]
    PermissionDenied {
        action: String,
        shortfall: Vec<ScopeShortfall>,
    },

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid parameters for action '{action}': {reason}")]
    InvalidParams { action: String, reason: String },

    #[error("action '{action}' failed: {reason}")]
    Execution { action: String, reason: String },

    #[error("action '{action}' timed out after {limit_ms}ms")]
    Timeout { action: String, limit_ms: u64 },

    #[error("host error: {0}")]
    Host(#[from] VcsError),
}

impl ActionError {
    pub fn execution(action: &str, reason: impl Into<String>) -> Self {
        ActionError::Execution {
            action: action.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ActionError::PermissionDenied { .. })
    }
}

fn format_shortfall(shortfall: &[ScopeShortfall]) -> String {
    shortfall
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors produced while loading or validating job definitions.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read job file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse job file: {0}")]
    Parse(String),

    #[error("invalid job '{job}': {reason}")]
    InvalidJob { job: String, reason: String },

    #[error("duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("invalid defaults: {0}")]
    InvalidDefaults(String),
}

impl ConfigError {
    pub(crate) fn invalid(job: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidJob {
            job: job.to_string(),
            reason: reason.into(),
        }
    }
}
