//! `flowsync` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: structural check of a workflow graph file.
//! - `plan`:     print the execution plan and its cost.
//! - `submit`:   compile a graph and start a run on the backend.
//! - `track`:    follow a run from NDJSON push events on stdin.
//! - `cancel`:   ask the backend to stop a run.
//! - `poll`:     follow a long-running operation by its status URL.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use backend::{HttpBackend, HttpBackendConfig, RunBackend};
use engine::pricing::estimate_cost;
use engine::{compile_plan, validate_graph, SubmitOptions, WorkflowExecutor, WorkflowGraph};
use poller::{PollerConfig, PollingEngine};
use tracker::{EventBus, RunEvent, RunOutcome, RunTracker, TrackerConfig};

#[derive(Parser)]
#[command(
    name = "flowsync",
    about = "Plan workflow runs and keep them in sync with the execution backend",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct BackendArgs {
    /// Base URL of the execution API.
    #[arg(long, env = "FLOWSYNC_API_URL", default_value = "http://localhost:8080/api")]
    api_url: String,
    /// Per-request timeout in seconds.
    #[arg(long, env = "FLOWSYNC_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
}

impl BackendArgs {
    fn connect(&self) -> Result<HttpBackend> {
        let backend = HttpBackend::new(HttpBackendConfig {
            base_url: self.api_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        })?;
        Ok(backend)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow graph JSON file.
    Validate {
        /// Path to the graph JSON file.
        path: PathBuf,
    },
    /// Print the steps, levels, dropped nodes and cost of a graph.
    Plan {
        path: PathBuf,
        /// Plan from these triggers only. Repeatable.
        #[arg(long = "trigger")]
        triggers: Vec<String>,
    },
    /// Compile a graph and start a run.
    Submit {
        path: PathBuf,
        #[arg(long)]
        job_id: String,
        /// Run-level inputs as a JSON object.
        #[arg(long, default_value = "{}")]
        inputs: String,
        /// Values for the workflow's declared inputs, as a JSON object.
        #[arg(long, default_value = "{}")]
        workflow_inputs: String,
        #[arg(long = "trigger")]
        triggers: Vec<String>,
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Track a run, reading push events as NDJSON from stdin.
    Track {
        path: PathBuf,
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        run_id: String,
        /// Seconds to wait for a chained run after a successful one.
        #[arg(long, env = "FLOWSYNC_GRACE_SECS", default_value_t = 3)]
        grace_secs: u64,
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Ask the backend to cancel a run.
    Cancel {
        #[arg(long)]
        run_id: String,
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Poll a status URL until the operation behind it finishes.
    Poll {
        url: String,
        /// Seconds between fetches.
        #[arg(long, env = "FLOWSYNC_POLL_INTERVAL_SECS", default_value_t = 5)]
        interval: u64,
        #[arg(long, env = "FLOWSYNC_POLL_MAX_ATTEMPTS", default_value_t = 120)]
        max_attempts: u32,
        /// Consecutive transient fetch errors to tolerate.
        #[arg(long, default_value_t = 0)]
        transient_retries: u32,
        #[command(flatten)]
        backend: BackendArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let graph = load_graph(&path)?;
            validate_graph(&graph).context("validation failed")?;
            let plan = compile_plan(&graph, None);
            println!(
                "Workflow is valid: {} executable step(s) in {} level(s)",
                plan.steps.len(),
                plan.levels.len()
            );
            if !plan.dropped.is_empty() {
                println!("Excluded by a dependency cycle: {}", plan.dropped.join(", "));
            }
        }
        Command::Plan { path, triggers } => {
            let graph = load_graph(&path)?;
            validate_graph(&graph)?;
            let plan = compile_plan(&graph, trigger_filter(&triggers));
            let cost = estimate_cost(&plan);
            print_json(&json!({
                "plan": plan,
                "cost": cost,
                "formattedCost": cost.formatted_total(),
            }))?;
        }
        Command::Submit {
            path,
            job_id,
            inputs,
            workflow_inputs,
            triggers,
            backend,
        } => {
            let graph = load_graph(&path)?;
            let mut options = SubmitOptions::new(job_id).with_inputs(parse_object(&inputs, "--inputs")?);
            options.workflow_inputs = parse_object(&workflow_inputs, "--workflow-inputs")?;
            if !triggers.is_empty() {
                options = options.with_triggers(triggers);
            }

            let executor = WorkflowExecutor::new(Arc::new(backend.connect()?));
            let submission = executor.submit(&graph, options).await?;
            info!(run_id = %submission.run_id, steps = submission.plan.steps.len(), "run created");
            println!("{}", submission.run_id);
        }
        Command::Track {
            path,
            job_id,
            run_id,
            grace_secs,
            backend,
        } => {
            let graph = load_graph(&path)?;
            let config = TrackerConfig {
                grace_period: Duration::from_secs(grace_secs),
            };
            let mut tracker = RunTracker::new(&graph, Arc::new(backend.connect()?), config);
            tracker.start_tracking(job_id, run_id);

            let outcome = track_stdin(&mut tracker).await?;
            print_json(&json!({
                "outcome": outcome_label(&outcome),
                "error": tracker.error(),
                "view": tracker.view(),
            }))?;
            if let RunOutcome::Failed(message) = outcome {
                bail!("run failed: {message}");
            }
        }
        Command::Cancel { run_id, backend } => {
            backend.connect()?.cancel_run(&run_id).await?;
            println!("Cancellation requested for {run_id}");
        }
        Command::Poll {
            url,
            interval,
            max_attempts,
            transient_retries,
            backend,
        } => {
            let config = PollerConfig {
                interval: Duration::from_secs(interval),
                max_attempts,
                transient_retries,
            };
            let engine = PollingEngine::new(Arc::new(backend.connect()?), config);
            let cancel = cancel_on_ctrl_c();

            let result = engine
                .poll_with_progress(&url, &cancel, |progress| {
                    if let Some(line) = &progress.status_line {
                        eprintln!("{line}");
                    }
                })
                .await?;
            print_json(&serde_json::to_value(&result)?)?;
        }
    }

    Ok(())
}

/// Publish stdin events onto a bus and let the tracker consume them.
///
/// If stdin ends while a grace window is open, the window still runs out
/// before the final view is taken.
async fn track_stdin(tracker: &mut RunTracker) -> Result<RunOutcome> {
    let bus = Arc::new(EventBus::new());
    let subscription = bus.subscribe_all();
    let token = subscription.token();

    let reader_bus = Arc::clone(&bus);
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunEvent>(&line) {
                Ok(event) => {
                    reader_bus.publish(event);
                }
                Err(e) => warn!("skipping malformed event line: {e}"),
            }
        }
        reader_bus.unsubscribe(token);
    });

    let outcome = tracker.run(subscription, cancel_on_ctrl_c()).await;
    reader.abort();

    if outcome == RunOutcome::Disconnected {
        if let Some(deadline) = tracker.grace_deadline() {
            tokio::time::sleep_until(deadline).await;
            tracker.finish_grace();
            return Ok(RunOutcome::Completed);
        }
    }
    Ok(outcome)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            token.cancel();
        }
    });
    cancel
}

fn load_graph(path: &Path) -> Result<WorkflowGraph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid graph JSON in {}", path.display()))
}

fn parse_object(raw: &str, flag: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))?;
    if !value.is_object() {
        bail!("{flag} must be a JSON object");
    }
    Ok(value)
}

fn trigger_filter(triggers: &[String]) -> Option<&[String]> {
    (!triggers.is_empty()).then_some(triggers)
}

fn outcome_label(outcome: &RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Completed => "completed",
        RunOutcome::Failed(_) => "failed",
        RunOutcome::Cancelled => "cancelled",
        RunOutcome::Disconnected => "disconnected",
        RunOutcome::Idle => "idle",
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
