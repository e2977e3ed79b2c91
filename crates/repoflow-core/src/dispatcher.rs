//! The dispatcher: evaluates every registered job against an envelope and
//! runs the matches.
//!
//! Each matched job runs in its own tokio task; steps inside a job run
//! strictly in order. Before the first step of a job runs, every step's
//! declared permission requirement is checked against the job scope, so a
//! job that would exceed its scope fails with no side effects at all.
//!
//! A job's failure never leaks into another job: `dispatch` always returns a
//! [`DispatchReport`] with one entry per registered job.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::action::{Action, ActionInvocation, ActionRegistry, JobContext, Params};
use crate::envelope::{EventEnvelope, SenderVerification};
use crate::error::{ActionError, ConfigError};
use crate::host::EventSource;
use crate::job::JobDefinition;
use crate::report::{DispatchReport, ExecutionResult, JobOutcome, StepReport, StepStatus};

/// Default per-step limit when a step sets no `timeout_secs`.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub step_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }
}

impl DispatcherConfig {
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }
}

/// Cooperative shutdown flag shared by the dispatcher, its job tasks and
/// the serve loop. Once triggered it stays triggered.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been triggered.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

/// Counters for one run of [`Dispatcher::serve`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServeSummary {
    /// Deliveries pulled from the source, including undecodable ones.
    pub received: usize,
    pub dispatched: usize,
    /// Well-formed events of a kind no job can handle.
    pub ignored: usize,
    /// Undecodable or malformed deliveries.
    pub discarded: usize,
    /// Failed jobs across all dispatched envelopes.
    pub failed_jobs: usize,
}

pub struct Dispatcher {
    jobs: Vec<Arc<JobDefinition>>,
    registry: Arc<ActionRegistry>,
    config: DispatcherConfig,
    shutdown: ShutdownSignal,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("jobs", &self.job_names())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl Dispatcher {
    /// Validate `jobs` against `registry` and freeze both.
    pub fn new(
        jobs: Vec<JobDefinition>,
        registry: ActionRegistry,
        config: DispatcherConfig,
    ) -> Result<Self, ConfigError> {
        if config.step_timeout.is_zero() {
            return Err(ConfigError::InvalidDefaults(
                "step timeout must be greater than zero".into(),
            ));
        }
        let mut names = HashSet::new();
        for job in &jobs {
            if !names.insert(job.name.as_str()) {
                return Err(ConfigError::DuplicateJob(job.name.clone()));
            }
            job.validate(&registry)?;
        }
        info!(
            jobs = jobs.len(),
            actions = registry.len(),
            "Dispatcher ready"
        );
        Ok(Self {
            jobs: jobs.into_iter().map(Arc::new).collect(),
            registry: Arc::new(registry),
            config,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Share an externally owned shutdown signal.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.iter().map(AsRef::as_ref)
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|job| job.name.as_str()).collect()
    }

    /// Names of the jobs `envelope` would run, without running anything.
    pub fn matching_jobs(&self, envelope: &EventEnvelope) -> Vec<&str> {
        self.jobs
            .iter()
            .filter(|job| job.matches(envelope))
            .map(|job| job.name.as_str())
            .collect()
    }

    /// Run every job matching `envelope` and report on all registered jobs.
    #[instrument(skip_all, fields(delivery = %envelope.delivery_id(), event = %envelope.kind()))]
    pub async fn dispatch(&self, envelope: EventEnvelope) -> DispatchReport {
        let started_at = Utc::now();
        let timer = Instant::now();
        let envelope = Arc::new(envelope);

        let mut results: Vec<Option<ExecutionResult>> = Vec::with_capacity(self.jobs.len());
        let mut running = Vec::new();

        for (index, job) in self.jobs.iter().enumerate() {
            let (matched, visited) = job.evaluate(&envelope);
            debug!(job = %job.name, matched, predicate_nodes = visited, "Evaluated job");

            if !matched {
                results.push(Some(ExecutionResult::skipped(&job.name)));
                continue;
            }
            if self.shutdown.is_triggered() {
                results.push(Some(cancelled(&job.name, Vec::new(), "shutdown in progress")));
                continue;
            }

            let run = JobRun {
                job: Arc::clone(job),
                envelope: Arc::clone(&envelope),
                registry: Arc::clone(&self.registry),
                default_timeout: self.config.step_timeout,
                shutdown: self.shutdown.clone(),
            };
            results.push(None);
            running.push((index, tokio::spawn(run.execute())));
        }

        let (indices, handles): (Vec<_>, Vec<_>) = running.into_iter().unzip();
        for (index, joined) in indices.into_iter().zip(join_all(handles).await) {
            let result = joined.unwrap_or_else(|e| {
                let job = &self.jobs[index].name;
                warn!(job = %job, error = %e, "Job task aborted");
                ExecutionResult {
                    job: job.clone(),
                    outcome: JobOutcome::Failed {
                        reason: format!("job task aborted: {e}"),
                    },
                    steps: Vec::new(),
                    duration_ms: 0,
                }
            });
            results[index] = Some(result);
        }

        let report = DispatchReport {
            dispatch_id: Uuid::new_v4(),
            delivery_id: envelope.delivery_id().to_string(),
            event: envelope.kind(),
            started_at,
            duration_ms: elapsed_ms(timer),
            results: results.into_iter().flatten().collect(),
        };
        info!(
            matched = report.matched_count(),
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            duration_ms = report.duration_ms,
            "Dispatch complete"
        );
        report
    }

    /// Pull events from `source` and dispatch each, until the source is
    /// exhausted or shutdown is triggered.
    ///
    /// Undecodable and malformed deliveries are logged and discarded; the
    /// loop keeps going. `on_report` sees every dispatch report.
    pub async fn serve<S, F>(
        &self,
        source: &mut S,
        verification: SenderVerification,
        mut on_report: F,
    ) -> ServeSummary
    where
        S: EventSource + ?Sized,
        F: FnMut(&DispatchReport),
    {
        let mut summary = ServeSummary::default();
        info!("Serving events");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.triggered() => {
                    info!("Shutdown requested, no further events will be read");
                    break;
                }
                next = source.fetch_event() => next,
            };

            let raw = match next {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    debug!("Event source exhausted");
                    break;
                }
                Err(e) => {
                    summary.received += 1;
                    summary.discarded += 1;
                    warn!(error = %e, "Discarding undecodable delivery");
                    continue;
                }
            };
            summary.received += 1;

            let envelope = match EventEnvelope::from_raw(&raw, verification) {
                Ok(envelope) => envelope,
                Err(e) if e.is_unsupported() => {
                    summary.ignored += 1;
                    debug!(error = %e, "Ignoring event");
                    continue;
                }
                Err(e) => {
                    summary.discarded += 1;
                    warn!(error = %e, delivery = ?raw.delivery_id, "Discarding malformed event");
                    continue;
                }
            };

            let report = self.dispatch(envelope).await;
            summary.dispatched += 1;
            summary.failed_jobs += report.failed_count();
            on_report(&report);
        }

        info!(
            received = summary.received,
            dispatched = summary.dispatched,
            discarded = summary.discarded,
            "Event loop stopped"
        );
        summary
    }
}

/// One matched job, owned by its task.
struct JobRun {
    job: Arc<JobDefinition>,
    envelope: Arc<EventEnvelope>,
    registry: Arc<ActionRegistry>,
    default_timeout: Duration,
    shutdown: ShutdownSignal,
}

impl JobRun {
    #[instrument(name = "job", skip_all, fields(job = %self.job.name))]
    async fn execute(self) -> ExecutionResult {
        let timer = Instant::now();
        info!("Job started");

        let mut result = match self.preflight() {
            Ok(actions) => {
                let mut ctx = JobContext::default();
                let result = self.run_steps(actions, &mut ctx).await;
                ctx.release_trees().await;
                result
            }
            Err(e) => {
                warn!(error = %e, "Job refused before any step ran");
                failed(&self.job.name, Vec::new(), e.to_string())
            }
        };
        result.duration_ms = elapsed_ms(timer);

        match &result.outcome {
            JobOutcome::Succeeded => info!(
                warnings = result.warning_count(),
                duration_ms = result.duration_ms,
                "Job succeeded"
            ),
            JobOutcome::Failed { reason } => warn!(reason = %reason, "Job failed"),
            JobOutcome::Cancelled { reason } => info!(reason = %reason, "Job cancelled"),
            JobOutcome::Skipped => {}
        }
        result
    }

    fn invocation<'a>(&'a self, step_name: &'a str, params: &'a Params) -> ActionInvocation<'a> {
        ActionInvocation {
            job: &self.job.name,
            step: step_name,
            envelope: &self.envelope,
            params,
            scope: &self.job.permissions,
        }
    }

    /// Resolve every step's action and check its requirement against the
    /// job scope.
    fn preflight(&self) -> Result<Vec<Arc<dyn Action>>, ActionError> {
        let mut actions = Vec::with_capacity(self.job.steps.len());
        for step in &self.job.steps {
            let action = self
                .registry
                .get(&step.uses)
                .ok_or_else(|| ActionError::UnknownAction(step.uses.clone()))?;
            let required = action.required_scope(&self.invocation(step.display_name(), &step.params));
            let shortfall = self.job.permissions.shortfall(&required);
            if !shortfall.is_empty() {
                return Err(ActionError::PermissionDenied {
                    action: step.uses.clone(),
                    shortfall,
                });
            }
            actions.push(action);
        }
        Ok(actions)
    }

    async fn run_steps(&self, actions: Vec<Arc<dyn Action>>, ctx: &mut JobContext) -> ExecutionResult {
        let mut reports = Vec::with_capacity(actions.len());

        for (step, action) in self.job.steps.iter().zip(actions) {
            let name = step.display_name();
            if self.shutdown.is_triggered() {
                return cancelled(
                    &self.job.name,
                    reports,
                    &format!("shutdown before step '{name}'"),
                );
            }

            let limit = step
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.default_timeout);
            let invocation = self.invocation(name, &step.params);
            let timer = Instant::now();
            debug!(step = name, action = %step.uses, "Step started");

            let outcome = match tokio::time::timeout(limit, action.invoke(&invocation, ctx)).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(ActionError::Timeout {
                    action: step.uses.clone(),
                    limit_ms: limit.as_millis() as u64,
                }),
            };
            let duration_ms = elapsed_ms(timer);

            match outcome {
                Ok(output) => {
                    ctx.outputs.insert(name.to_string(), output.clone());
                    reports.push(StepReport {
                        step: name.to_string(),
                        action: step.uses.clone(),
                        status: StepStatus::Succeeded,
                        output: Some(output),
                        duration_ms,
                    });
                }
                // Permission failures are fatal even for best-effort steps.
                Err(e) if step.best_effort && !e.is_permission_denied() => {
                    warn!(step = name, error = %e, "Best-effort step failed, continuing");
                    reports.push(StepReport {
                        step: name.to_string(),
                        action: step.uses.clone(),
                        status: StepStatus::Warned {
                            reason: e.to_string(),
                        },
                        output: None,
                        duration_ms,
                    });
                }
                Err(e) => {
                    let reason = format!("step '{name}' failed: {e}");
                    reports.push(StepReport {
                        step: name.to_string(),
                        action: step.uses.clone(),
                        status: StepStatus::Failed {
                            reason: e.to_string(),
                        },
                        output: None,
                        duration_ms,
                    });
                    return failed(&self.job.name, reports, reason);
                }
            }
        }

        ExecutionResult {
            job: self.job.name.clone(),
            outcome: JobOutcome::Succeeded,
            steps: reports,
            duration_ms: 0,
        }
    }
}

fn failed(job: &str, steps: Vec<StepReport>, reason: String) -> ExecutionResult {
    ExecutionResult {
        job: job.to_string(),
        outcome: JobOutcome::Failed { reason },
        steps,
        duration_ms: 0,
    }
}

fn cancelled(job: &str, steps: Vec<StepReport>, reason: &str) -> ExecutionResult {
    ExecutionResult {
        job: job.to_string(),
        outcome: JobOutcome::Cancelled {
            reason: reason.to_string(),
        },
        steps,
        duration_ms: 0,
    }
}

fn elapsed_ms(timer: Instant) -> u64 {
    timer.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{HostOp, MemoryVcsHost};
    use crate::envelope::EventKind;
    use crate::job::ActionStep;
    use crate::permission::{AccessLevel, PermissionScope, Resource};
    use crate::predicate::{Field, Predicate};

    fn dispatcher(jobs: Vec<JobDefinition>) -> (Dispatcher, Arc<MemoryVcsHost>) {
        let host = Arc::new(MemoryVcsHost::new());
        let registry = ActionRegistry::with_builtins(host.clone());
        let dispatcher = Dispatcher::new(jobs, registry, DispatcherConfig::default()).unwrap();
        (dispatcher, host)
    }

    fn issues_write() -> PermissionScope {
        PermissionScope::read_all().with(Resource::Issues, AccessLevel::Write)
    }

    fn comment(body: &str) -> EventEnvelope {
        EventEnvelope::builder(EventKind::CommentCreated, "octocat")
            .issue(7)
            .comment(body)
            .build()
    }

    #[test]
    fn test_shutdown_signal_is_sticky_and_shared() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_triggered());
        signal.trigger();
        signal.trigger();
        assert!(clone.is_triggered());
    }

    #[tokio::test]
    async fn test_triggered_resolves_after_trigger() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.triggered().await })
        };
        signal.trigger();
        waiter.await.unwrap();
        // Already triggered: resolves immediately.
        signal.triggered().await;
    }

    #[test]
    fn test_new_rejects_duplicate_job_names() {
        let host = Arc::new(MemoryVcsHost::new());
        let job = JobDefinition::new("same").step(ActionStep::new("checkout"));
        let err = Dispatcher::new(
            vec![job.clone(), job],
            ActionRegistry::with_builtins(host),
            DispatcherConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateJob(name) if name == "same"));
    }

    #[test]
    fn test_new_rejects_zero_step_timeout() {
        let host = Arc::new(MemoryVcsHost::new());
        let err = Dispatcher::new(
            vec![JobDefinition::new("j").step(ActionStep::new("checkout"))],
            ActionRegistry::with_builtins(host),
            DispatcherConfig::default().with_step_timeout(Duration::ZERO),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDefaults(_)));
    }

    #[test]
    fn test_matching_jobs_is_a_dry_run() {
        let (dispatcher, host) = dispatcher(vec![
            JobDefinition::new("greet")
                .on(EventKind::CommentCreated)
                .when(Predicate::contains(Field::CommentBody, "/hello"))
                .permissions(issues_write())
                .step(ActionStep::new("post_comment").with("body", "hi")),
            JobDefinition::new("other")
                .on(EventKind::PullRequestOpened)
                .step(ActionStep::new("checkout")),
        ]);
        assert_eq!(dispatcher.matching_jobs(&comment("/hello there")), vec!["greet"]);
        assert!(dispatcher.matching_jobs(&comment("nothing")).is_empty());
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_report_has_one_entry_per_job_in_order() {
        let (dispatcher, host) = dispatcher(vec![
            JobDefinition::new("b-skipped")
                .on(EventKind::PullRequestOpened)
                .step(ActionStep::new("checkout")),
            JobDefinition::new("a-runs")
                .on(EventKind::CommentCreated)
                .permissions(issues_write())
                .step(ActionStep::new("post_comment").with("body", "ack")),
        ]);

        let report = dispatcher.dispatch(comment("/anything")).await;
        let names: Vec<&str> = report.results.iter().map(|r| r.job.as_str()).collect();
        assert_eq!(names, vec!["b-skipped", "a-runs"]);
        assert!(report.result("b-skipped").unwrap().was_skipped());
        assert!(report.result("a-runs").unwrap().succeeded());
        assert_eq!(host.count(HostOp::PostComment), 1);
        assert_eq!(report.event, EventKind::CommentCreated);
    }

    #[tokio::test]
    async fn test_step_outputs_are_reported() {
        let (dispatcher, _host) = dispatcher(vec![JobDefinition::new("ack")
            .permissions(issues_write())
            .step(ActionStep::new("post_comment").with("body", "ack"))]);

        let report = dispatcher.dispatch(comment("x")).await;
        let step = report.result("ack").unwrap().step("post_comment").unwrap();
        assert_eq!(step.output.as_ref().unwrap()["issue"], 7);
    }
}
