//! `chainflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — check a workflow JSON file and print its execution order.
//! - `run`      — execute a workflow, optionally replaying recorded events
//!   into its event sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::{
    ChannelNotifier, EngineConfig, ExecutionEvent, ExecutionNotifier, InMemoryBridge, TracingNotifier, Workflow,
    WorkflowEngine,
};
use nodes::HandlerRegistry;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chainflow", about = "Blockchain workflow automation engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execute a workflow definition JSON file.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// JSON value used as input by root nodes without their own.
        #[arg(long)]
        input: Option<String>,
        /// JSON file holding `[{ "subject": ..., "payload": ... }]` to deliver
        /// after the initial walk.
        #[arg(long)]
        events: Option<PathBuf>,
        /// Iterations for loop nodes that don't set a count.
        #[arg(long, env = "CHAINFLOW_LOOP_ITERATIONS", default_value_t = 3)]
        loop_iterations: u32,
        /// Seconds to wait for event-triggered walks to finish.
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },
}

/// One recorded event for replay.
#[derive(Debug, Deserialize)]
struct ReplayEvent {
    subject: String,
    #[serde(default)]
    payload: Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let workflow = load_workflow(&path)?;
            match engine::validate_dag(&workflow) {
                Ok(order) => {
                    println!("✅ Workflow is valid. Execution order: {order:?}");
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Run { path, input, events, loop_iterations, wait_secs } => {
            let mut workflow = load_workflow(&path)?;
            if let Some(raw) = input {
                workflow.input = serde_json::from_str(&raw).context("--input is not valid JSON")?;
            }
            let replay = match events {
                Some(path) => load_events(&path)?,
                None => Vec::new(),
            };
            run(workflow, replay, loop_iterations, Duration::from_secs(wait_secs)).await?;
        }
    }

    Ok(())
}

async fn run(workflow: Workflow, replay: Vec<ReplayEvent>, loop_iterations: u32, wait: Duration) -> Result<()> {
    let bridge = Arc::new(InMemoryBridge::new());
    let (notifier, mut events) = ChannelNotifier::channel();
    let config = EngineConfig { default_loop_iterations: loop_iterations, ..EngineConfig::default() };
    let engine = WorkflowEngine::new(Arc::new(HandlerRegistry::builtin()), bridge.clone(), Arc::new(notifier))
        .with_config(config);

    let outcome = engine.execute(workflow).await;
    forward(&mut events);
    let result = outcome?;
    info!("execution {} finished initial walk", result.execution_id);

    let mut pending = 0;
    for event in &replay {
        let delivered = bridge.emit(&event.subject, event.payload.clone());
        if delivered == 0 {
            warn!(subject = %event.subject, "no watch matches replayed event");
        }
        pending += delivered;
    }

    if pending > 0 {
        let finished = tokio::time::timeout(wait, await_walks(&mut events, pending)).await;
        if finished.is_err() {
            engine.unwatch_all(&result.run);
            bail!("timed out waiting for {pending} event walk(s)");
        }
    }
    engine.unwatch_all(&result.run);

    println!("{}", serde_json::to_string_pretty(&result.run.results())?);
    Ok(())
}

/// Log everything already queued.
fn forward(events: &mut UnboundedReceiver<ExecutionEvent>) {
    while let Ok(event) = events.try_recv() {
        TracingNotifier.notify(event);
    }
}

async fn await_walks(events: &mut UnboundedReceiver<ExecutionEvent>, mut remaining: usize) {
    while remaining > 0 {
        let Some(event) = events.recv().await else { return };
        if matches!(event, ExecutionEvent::WalkComplete { .. } | ExecutionEvent::WalkError { .. }) {
            remaining -= 1;
        }
        TracingNotifier.notify(event);
    }
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).context("invalid workflow JSON")
}

fn load_events(path: &Path) -> Result<Vec<ReplayEvent>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).context("events file must be a JSON array of { subject, payload }")
}
