//! Per-job execution results and the per-envelope dispatch report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::envelope::EventKind;

/// Terminal state of one job for one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed { reason: String },
    /// Trigger or predicate did not match.
    Skipped,
    /// Shutdown began before the job could finish.
    Cancelled { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// A best-effort step failed; the job went on.
    Warned { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: String,
    pub action: String,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub duration_ms: u64,
}

impl StepReport {
    pub fn passed(&self) -> bool {
        matches!(self.status, StepStatus::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub job: String,
    pub outcome: JobOutcome,
    /// Steps that ran, in order.
    pub steps: Vec<StepReport>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn skipped(job: &str) -> Self {
        Self {
            job: job.to_string(),
            outcome: JobOutcome::Skipped,
            steps: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == JobOutcome::Succeeded
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed { .. })
    }

    pub fn was_skipped(&self) -> bool {
        self.outcome == JobOutcome::Skipped
    }

    pub fn warning_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Warned { .. }))
            .count()
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step == name)
    }
}

/// Everything that happened for one envelope, one entry per registered job
/// in registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub dispatch_id: Uuid,
    pub delivery_id: String,
    pub event: EventKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: Vec<ExecutionResult>,
}

impl DispatchReport {
    pub fn result(&self, job: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.job == job)
    }

    pub fn matched_count(&self) -> usize {
        self.results.iter().filter(|r| !r.was_skipped()).count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.failed()).count()
    }

    /// No matched job failed or was cancelled.
    pub fn all_succeeded(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.succeeded() || r.was_skipped())
    }
}
