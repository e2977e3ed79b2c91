//! repoflow - event-driven automation for repository events
//!
//! The `repoflow` command loads a job file and runs the jobs an event
//! triggers.
//!
//! ## Commands
//!
//! - `validate`: Load a job file and check every job against the built-in actions
//! - `jobs`: Show which jobs an event would trigger, without running anything
//! - `dispatch`: Run the jobs triggered by one event (e.g. inside GitHub Actions)
//! - `serve`: Dispatch newline-delimited JSON events from stdin until EOF or Ctrl-C

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use repoflow_core::{
    verify_signature, ActionRegistry, DispatchReport, Dispatcher, EventEnvelope, JobFile,
    JobOutcome, JsonLinesSource, RawEvent, SenderVerification, ServeSummary, VcsHost,
};
use repoflow_github::{GitHubConfig, GitHubHost};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "repoflow")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Event-driven automation for repository events", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Format of reports written to stdout
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Args, Debug)]
struct JobsArg {
    /// Job file (YAML, or JSON when the extension is .json)
    #[arg(long, env = "REPOFLOW_JOBS", default_value = "repoflow.yml")]
    jobs: PathBuf,
}

#[derive(Args, Debug)]
struct EventArgs {
    /// Event name, e.g. issue_comment or pull_request
    #[arg(long, env = "GITHUB_EVENT_NAME")]
    event: String,

    /// Path to the JSON event payload
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    payload: PathBuf,

    /// Delivery id (X-GitHub-Delivery); generated when omitted
    #[arg(long)]
    delivery_id: Option<String>,
}

#[derive(Args, Debug, Default)]
struct HostArgs {
    /// GitHub REST API base URL
    #[arg(long, env = "GITHUB_API_URL")]
    api_url: Option<String>,

    /// GitHub token used for API calls and fetches
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Directory in which working trees are created
    #[arg(long, env = "REPOFLOW_WORKSPACE")]
    workspace: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a job file
    Validate {
        #[command(flatten)]
        jobs: JobsArg,
    },

    /// Show which jobs an event would trigger (dry run)
    Jobs {
        #[command(flatten)]
        jobs: JobsArg,

        #[command(flatten)]
        event: EventArgs,
    },

    /// Run the jobs triggered by a single event
    Dispatch {
        #[command(flatten)]
        jobs: JobsArg,

        #[command(flatten)]
        event: EventArgs,

        #[command(flatten)]
        host: HostArgs,

        /// Secret for verifying the X-Hub-Signature-256 of the payload
        #[arg(long, env = "REPOFLOW_WEBHOOK_SECRET", hide_env_values = true)]
        webhook_secret: Option<String>,

        /// X-Hub-Signature-256 header value (sha256=...)
        #[arg(long, requires = "webhook_secret")]
        signature: Option<String>,

        /// Treat the sender as verified (the platform delivered the event)
        #[arg(long, conflicts_with = "webhook_secret")]
        trusted_source: bool,
    },

    /// Dispatch newline-delimited JSON events read from stdin
    Serve {
        #[command(flatten)]
        jobs: JobsArg,

        #[command(flatten)]
        host: HostArgs,

        /// Treat every sender as verified
        #[arg(long)]
        trusted_source: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    repoflow_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate { jobs } => {
            let host = github_host(&HostArgs::default())?;
            cmd_validate(&jobs.jobs, host, cli.output)
        }
        Commands::Jobs { jobs, event } => {
            let host = github_host(&HostArgs::default())?;
            cmd_jobs(&jobs.jobs, &event, host, cli.output)
        }
        Commands::Dispatch {
            jobs,
            event,
            host,
            webhook_secret,
            signature,
            trusted_source,
        } => {
            let host = github_host(&host)?;
            let dispatcher = load_dispatcher(&jobs.jobs, host)?;
            let (raw, body) = read_event(&event)?;
            let verification = sender_verification(
                &body,
                webhook_secret.as_deref(),
                signature.as_deref(),
                trusted_source,
            )?;
            cmd_dispatch(&dispatcher, &raw, verification, cli.output).await
        }
        Commands::Serve {
            jobs,
            host,
            trusted_source,
        } => {
            let host = github_host(&host)?;
            let dispatcher = load_dispatcher(&jobs.jobs, host)?;
            let verification = if trusted_source {
                SenderVerification::Verified
            } else {
                SenderVerification::Unverified
            };
            cmd_serve(&dispatcher, verification, cli.output).await
        }
    }
}

fn github_host(args: &HostArgs) -> Result<Arc<dyn VcsHost>> {
    let mut config = GitHubConfig::from_env();
    if let Some(api_url) = &args.api_url {
        config.api_url = api_url.clone();
    }
    if let Some(token) = &args.token {
        config = config.with_token(token);
    }
    if let Some(workspace) = &args.workspace {
        config = config.with_workspace(workspace);
    }
    let host = GitHubHost::new(config).context("Failed to create GitHub client")?;
    Ok(Arc::new(host))
}

fn load_job_file(path: &Path) -> Result<JobFile> {
    JobFile::from_path(path).with_context(|| format!("Failed to load job file {:?}", path))
}

fn load_dispatcher(path: &Path, host: Arc<dyn VcsHost>) -> Result<Dispatcher> {
    load_job_file(path)?
        .into_dispatcher(ActionRegistry::with_builtins(host))
        .with_context(|| format!("Invalid job file {:?}", path))
}

/// Read the payload file, returning the event and the exact bytes read.
fn read_event(args: &EventArgs) -> Result<(RawEvent, Vec<u8>)> {
    let body = std::fs::read(&args.payload)
        .with_context(|| format!("Failed to read event payload: {:?}", args.payload))?;
    let payload: Value = serde_json::from_slice(&body)
        .with_context(|| format!("Invalid JSON in {:?}", args.payload))?;
    let raw = RawEvent {
        event: args.event.clone(),
        delivery_id: args.delivery_id.clone(),
        payload,
    };
    Ok((raw, body))
}

/// A signed delivery must verify; an unsigned one is trusted only when the
/// caller says the platform delivered it.
fn sender_verification(
    body: &[u8],
    secret: Option<&str>,
    signature: Option<&str>,
    trusted_source: bool,
) -> Result<SenderVerification> {
    match (secret, signature) {
        (Some(secret), Some(signature)) => {
            verify_signature(secret.as_bytes(), body, signature)
                .context("Webhook signature verification failed")?;
            Ok(SenderVerification::Verified)
        }
        (Some(_), None) => bail!("--webhook-secret is set but no --signature was given"),
        (None, _) if trusted_source => Ok(SenderVerification::Verified),
        (None, _) => Ok(SenderVerification::Unverified),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Validate a job file
fn cmd_validate(path: &Path, host: Arc<dyn VcsHost>, output: OutputFormat) -> Result<()> {
    let dispatcher = load_dispatcher(path, host)?;

    if output == OutputFormat::Json {
        let jobs: Vec<_> = dispatcher.jobs().collect();
        return print_json(&jobs);
    }

    println!("{:?}: {} job(s) OK", path, dispatcher.job_names().len());
    for job in dispatcher.jobs() {
        let on = if job.on.is_empty() {
            "any event".to_string()
        } else {
            job.on.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
        };
        let grants = job
            .permissions
            .grants()
            .map(|(resource, level)| format!("{resource}: {level}"))
            .collect::<Vec<_>>();
        println!("  {}", job.name);
        println!("    on:          {}", on);
        println!("    steps:       {}", job.steps.len());
        if !grants.is_empty() {
            println!("    permissions: {}", grants.join(", "));
        }
    }
    Ok(())
}

/// Dry run: which jobs would this event trigger?
fn cmd_jobs(
    path: &Path,
    event: &EventArgs,
    host: Arc<dyn VcsHost>,
    output: OutputFormat,
) -> Result<()> {
    let dispatcher = load_dispatcher(path, host)?;
    let (raw, _) = read_event(event)?;
    let Some(envelope) = normalize(&raw, SenderVerification::Unverified)? else {
        return Ok(());
    };

    let matched = dispatcher.matching_jobs(&envelope);
    if output == OutputFormat::Json {
        return print_json(&json!({
            "event": envelope.kind(),
            "delivery_id": envelope.delivery_id(),
            "matched": matched,
        }));
    }

    if matched.is_empty() {
        println!("No jobs match {} from @{}", envelope.kind(), envelope.actor());
    } else {
        println!("{} from @{} triggers:", envelope.kind(), envelope.actor());
        for name in matched {
            println!("  {}", name);
        }
    }
    Ok(())
}

/// `Ok(None)` for events no job can handle; malformed events are errors.
fn normalize(raw: &RawEvent, verification: SenderVerification) -> Result<Option<EventEnvelope>> {
    match EventEnvelope::from_raw(raw, verification) {
        Ok(envelope) => Ok(Some(envelope)),
        Err(e) if e.is_unsupported() => {
            info!(error = %e, "Nothing to do");
            Ok(None)
        }
        Err(e) => Err(e).context("Malformed event"),
    }
}

/// Dispatch one event; fails when any triggered job did not succeed.
async fn cmd_dispatch(
    dispatcher: &Dispatcher,
    raw: &RawEvent,
    verification: SenderVerification,
    output: OutputFormat,
) -> Result<()> {
    let Some(envelope) = normalize(raw, verification)? else {
        return Ok(());
    };

    let report = dispatcher.dispatch(envelope).await;
    print_report(&report, output)?;

    if !report.all_succeeded() {
        bail!(
            "{} of {} triggered job(s) did not succeed",
            report.matched_count() - report.succeeded_count(),
            report.matched_count()
        );
    }
    Ok(())
}

/// Serve events from stdin until EOF or Ctrl-C.
async fn cmd_serve(
    dispatcher: &Dispatcher,
    verification: SenderVerification,
    output: OutputFormat,
) -> Result<()> {
    let shutdown = dispatcher.shutdown_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing in-flight steps");
            shutdown.trigger();
        }
    });

    let mut source = JsonLinesSource::new(BufReader::new(tokio::io::stdin()));
    let summary = dispatcher
        .serve(&mut source, verification, |report| {
            if let Err(e) = print_serve_report(report, output) {
                warn!(error = %e, "Failed to write report");
            }
        })
        .await;

    print_summary(&summary, output)
}

fn print_serve_report(report: &DispatchReport, output: OutputFormat) -> Result<()> {
    match output {
        // One report per line so the stream stays machine-readable.
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(report)?);
            Ok(())
        }
        OutputFormat::Text => print_report(report, output),
    }
}

fn print_report(report: &DispatchReport, output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        return print_json(report);
    }

    println!(
        "Dispatch {} ({}, delivery {}) in {}ms",
        report.dispatch_id, report.event, report.delivery_id, report.duration_ms
    );
    for result in &report.results {
        let status = match &result.outcome {
            JobOutcome::Succeeded if result.warning_count() > 0 => {
                format!("succeeded with {} warning(s)", result.warning_count())
            }
            JobOutcome::Succeeded => "succeeded".to_string(),
            JobOutcome::Skipped => "skipped".to_string(),
            JobOutcome::Failed { reason } => format!("FAILED: {reason}"),
            JobOutcome::Cancelled { reason } => format!("cancelled: {reason}"),
        };
        println!("  {:<32} {}", result.job, status);
    }
    Ok(())
}

fn print_summary(summary: &ServeSummary, output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        return print_json(summary);
    }
    println!(
        "Received {} event(s): {} dispatched, {} ignored, {} discarded, {} failed job(s)",
        summary.received, summary.dispatched, summary.ignored, summary.discarded, summary.failed_jobs
    );
    Ok(())
}
