//! End-to-end dispatch of raw deliveries through the example job file.

use std::sync::Arc;

use repoflow_core::fakes::{Fault, HostCall, HostOp, MemoryVcsHost};
use repoflow_core::{
    ActionRegistry, Dispatcher, EventEnvelope, JobFile, JobOutcome, RawEvent, SenderVerification,
    StepStatus,
};
use serde_json::{json, Value};

const EXAMPLE_JOBS: &str = include_str!("../../../repoflow.example.yml");

fn dispatcher() -> (Dispatcher, Arc<MemoryVcsHost>) {
    let host = Arc::new(MemoryVcsHost::new());
    let registry = ActionRegistry::with_builtins(host.clone());
    let dispatcher = JobFile::from_yaml_str(EXAMPLE_JOBS)
        .expect("example job file parses")
        .into_dispatcher(registry)
        .expect("example job file validates");
    (dispatcher, host)
}

fn comment_payload(actor: &str, body: &str) -> Value {
    json!({
        "action": "created",
        "sender": { "login": actor },
        "repository": { "full_name": "acme/app", "default_branch": "main" },
        "issue": {
            "number": 42,
            "state": "open",
            "pull_request": { "url": "https://api.github.com/repos/acme/app/pulls/42" }
        },
        "comment": { "body": body }
    })
}

fn pull_request_payload(actor: &str) -> Value {
    json!({
        "action": "opened",
        "number": 7,
        "sender": { "login": actor },
        "repository": { "full_name": "acme/app", "default_branch": "main" },
        "pull_request": {
            "number": 7,
            "state": "open",
            "base": { "ref": "main", "repo": { "full_name": "acme/app" } },
            "head": { "ref": "dependabot/cargo/serde-1.0.200", "repo": { "full_name": "acme/app" } }
        }
    })
}

fn envelope(event: &str, payload: Value) -> EventEnvelope {
    EventEnvelope::from_raw(&RawEvent::new(event, payload), SenderVerification::Verified)
        .expect("payload normalizes")
}

#[test]
fn example_file_registers_all_jobs() {
    let (dispatcher, _host) = dispatcher();
    assert_eq!(
        dispatcher.job_names(),
        vec!["manual_deploy_dev", "dependabot_auto_merge", "run_full_pr_tests"]
    );
}

#[tokio::test]
async fn deploy_comment_checks_out_base_and_announces() {
    let (dispatcher, host) = dispatcher();
    let env = envelope("issue_comment", comment_payload("octocat", "/deploy-dev"));

    let report = dispatcher.dispatch(env).await;

    let deploy = report.result("manual_deploy_dev").unwrap();
    assert_eq!(deploy.outcome, JobOutcome::Succeeded);
    assert_eq!(deploy.steps.len(), 2);
    assert!(report.result("dependabot_auto_merge").unwrap().was_skipped());
    assert!(report.result("run_full_pr_tests").unwrap().was_skipped());

    assert_eq!(
        host.calls(),
        vec![
            HostCall::Checkout {
                git_ref: "main".into(),
                writable: false,
            },
            HostCall::PostComment {
                issue: 42,
                body: "Deployed acme/app to dev for PR #42 (requested by @octocat).".into(),
            },
        ]
    );
}

#[tokio::test]
async fn deploy_comment_on_plain_issue_is_skipped() {
    let (dispatcher, host) = dispatcher();
    let mut payload = comment_payload("octocat", "/deploy-dev");
    payload["issue"]
        .as_object_mut()
        .unwrap()
        .remove("pull_request");

    let report = dispatcher.dispatch(envelope("issue_comment", payload)).await;

    assert_eq!(report.matched_count(), 0);
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn dependabot_merge_failure_is_best_effort() {
    let (dispatcher, host) = dispatcher();
    host.fail(HostOp::Merge, Fault::MergeConflict);

    let report = dispatcher
        .dispatch(envelope("pull_request", pull_request_payload("dependabot[bot]")))
        .await;

    let job = report.result("dependabot_auto_merge").unwrap();
    assert_eq!(job.outcome, JobOutcome::Succeeded);
    let statuses: Vec<(&str, bool)> = job
        .steps
        .iter()
        .map(|s| (s.step.as_str(), s.passed()))
        .collect();
    assert_eq!(
        statuses,
        vec![("checkout", true), ("metadata", true), ("merge", false), ("announce", true)]
    );
    assert!(matches!(
        &job.step("merge").unwrap().status,
        StepStatus::Warned { reason } if reason.contains("merge conflict")
    ));
    assert_eq!(job.warning_count(), 1);

    // The success comment is still posted after a failed merge.
    assert_eq!(
        host.comments(),
        vec![(7, "Dependabot PR #7 auto-merged.".to_string())]
    );
    assert!(host.calls().contains(&HostCall::Checkout {
        git_ref: "dependabot/cargo/serde-1.0.200".into(),
        writable: true,
    }));
}

#[tokio::test]
async fn pull_request_from_other_actor_does_not_merge() {
    let (dispatcher, host) = dispatcher();

    let report = dispatcher
        .dispatch(envelope("pull_request", pull_request_payload("mallory")))
        .await;

    assert!(report.result("dependabot_auto_merge").unwrap().was_skipped());
    assert_eq!(host.count(HostOp::Merge), 0);
}

#[tokio::test]
async fn untrusted_actor_cannot_run_full_tests() {
    let (dispatcher, host) = dispatcher();

    let report = dispatcher
        .dispatch(envelope(
            "issue_comment",
            comment_payload("untrusted-user", "/run-full-pr-tests"),
        ))
        .await;

    assert!(report.result("run_full_pr_tests").unwrap().was_skipped());
    assert_eq!(report.matched_count(), 0);
    assert_eq!(host.count(HostOp::Checkout), 0);
    assert_eq!(host.count(HostOp::RunCommand), 0);
}

#[tokio::test]
async fn trusted_actor_runs_full_tests_on_pull_request_head() {
    let (dispatcher, host) = dispatcher();

    let report = dispatcher
        .dispatch(envelope(
            "issue_comment",
            comment_payload("your-github-username", "/run-full-pr-tests"),
        ))
        .await;

    let job = report.result("run_full_pr_tests").unwrap();
    assert!(job.succeeded(), "{:?}", job.outcome);
    assert_eq!(
        host.calls()[0],
        HostCall::Checkout {
            git_ref: "refs/pull/42/head".into(),
            writable: false,
        }
    );
    let commands = host.commands();
    assert_eq!(commands[0].run, "make test-full");
    assert_eq!(commands[0].env["PR_NUMBER"], "42");
    assert!(commands[0].cwd.is_some());
}

#[tokio::test]
async fn failing_test_suite_skips_the_report_comment() {
    let (dispatcher, host) = dispatcher();
    host.fail(HostOp::RunCommand, Fault::ExitCode(2));

    let report = dispatcher
        .dispatch(envelope(
            "issue_comment",
            comment_payload("your-github-username", "/run-full-pr-tests"),
        ))
        .await;

    let job = report.result("run_full_pr_tests").unwrap();
    match &job.outcome {
        JobOutcome::Failed { reason } => {
            assert!(reason.contains("step 'tests' failed"), "{reason}");
            assert!(reason.contains("exited with code 2"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(job.steps.len(), 2);
    assert_eq!(host.count(HostOp::PostComment), 0);
}
