//! repoflow core library
//!
//! Binds repository events (comments, pull request updates) to statically
//! registered jobs. A job fires when its trigger list and predicate match
//! the event, and runs its steps under a declared permission scope.
//!
//! Data flow: [`RawEvent`] → [`EventEnvelope`] → [`Dispatcher`] →
//! per-job [`ExecutionResult`]s collected in a [`DispatchReport`].
//!
//! All side effects go through the [`VcsHost`] trait; the core itself never
//! touches a network or a shell.

pub mod action;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod fakes;
pub mod host;
pub mod job;
pub mod permission;
pub mod predicate;
pub mod report;
pub mod telemetry;
pub mod template;
pub mod webhook;

pub use action::{Action, ActionInvocation, ActionRegistry, JobContext, Params};
pub use config::{JobFile, JobSpec};
pub use dispatcher::{Dispatcher, DispatcherConfig, ServeSummary, ShutdownSignal};
pub use envelope::{
    EventEnvelope, EventKind, PullRequestRef, RawEvent, Repository, SenderVerification,
};
pub use error::{ActionError, ConfigError, EnvelopeError, VcsError};
pub use host::{
    CommandOutput, CommandSpec, CommentId, EventSource, JsonLinesSource, MergeResult,
    MergeStrategy, PullRequestMetadata, VcsHost, WorkingTree,
};
pub use job::{ActionStep, JobDefinition};
pub use permission::{AccessLevel, PermissionScope, Resource, ScopeShortfall};
pub use predicate::{evaluate, evaluate_counted, Field, Literal, Predicate};
pub use report::{DispatchReport, ExecutionResult, JobOutcome, StepReport, StepStatus};
pub use telemetry::init_tracing;
pub use webhook::{sign, verify_signature, SignatureError};
