//! reelsmith command line interface.
//!
//! Wires the engine together from the working directory's configuration and
//! drives one run operation per invocation. Runs are durable: `start` can be
//! interrupted and picked up later with `resume`, and pending reviews are
//! resolved with `review`.

use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use colored::Colorize;
use reel_core::checkpoint::FsCheckpointStore;
use reel_core::collaborators::{Collaborators, FsArtifactWriter};
use reel_core::config::{load_config, EngineConfig};
use reel_core::engine::PipelineEngine;
use reel_core::governor::RateGovernor;
use reel_core::registry::RunRegistry;
use reel_core::stages::{standard_set, StageContext};
use reel_protocol::{Event, ReviewDecision, RunStatus, RunSummary};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "reelsmith", version, about = "Multi-stage video content pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new run for a topic.
    Start { topic: String },

    /// Show the current state of a run.
    Status { run_id: Uuid },

    /// Resume an interrupted or failed run from its latest checkpoint.
    Resume { run_id: Uuid },

    /// Resolve a pending review on a run.
    Review {
        run_id: Uuid,
        #[command(subcommand)]
        decision: Decision,
    },

    /// Abort a run.
    Abort { run_id: Uuid },
}

#[derive(Subcommand)]
enum Decision {
    /// Accept the artifact and continue the run.
    Approve,

    /// Send the stage back with feedback.
    Reject {
        #[arg(long)]
        feedback: String,
    },

    /// Halt the run.
    Abort,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;
    let config = Arc::new(load_config(&cwd).await?);
    let (registry, events_rx) = build_registry(Arc::clone(&config));
    let printer = tokio::spawn(print_events(events_rx));

    let result = match cli.command {
        Command::Start { topic } => {
            let run_id = registry.start(topic).await;
            println!("{} {}", "run".bold(), run_id);
            let summary = wait_for_pause(&registry, run_id).await?;
            report(&summary);
            Ok(())
        }
        Command::Status { run_id } => {
            let summary = registry.status(run_id).await?;
            report(&summary);
            Ok(())
        }
        Command::Resume { run_id } => {
            registry.resume(run_id).await?;
            let summary = wait_for_pause(&registry, run_id).await?;
            report(&summary);
            Ok(())
        }
        Command::Review { run_id, decision } => {
            let summary = registry.status(run_id).await?;
            if summary.status != RunStatus::AwaitingReview {
                return Err(eyre!(
                    "run {run_id} is not awaiting review (status {:?})",
                    summary.status
                ));
            }
            // The engine for a suspended run is not resident in this
            // process; resume re-enters the review wait first.
            registry.resume(run_id).await?;
            wait_for_status(&registry, run_id, RunStatus::AwaitingReview).await?;
            registry.resolve_review(run_id, decision.into()).await?;
            let summary = wait_for_pause(&registry, run_id).await?;
            report(&summary);
            Ok(())
        }
        Command::Abort { run_id } => {
            registry.abort(run_id).await?;
            tokio::time::sleep(Duration::from_millis(200)).await;
            let summary = registry.status(run_id).await?;
            report(&summary);
            Ok(())
        }
    };

    drop(registry);
    let _ = printer.await;
    result
}

impl From<Decision> for ReviewDecision {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approve => ReviewDecision::Approve,
            Decision::Reject { feedback } => ReviewDecision::Reject { feedback },
            Decision::Abort => ReviewDecision::Abort,
        }
    }
}

/// Assemble the engine and registry for the loaded configuration.
///
/// Providers are the composition seam: this binary ships without adapters
/// wired in, so collaborator calls fail until they are configured.
fn build_registry(config: Arc<EngineConfig>) -> (RunRegistry, mpsc::Receiver<Event>) {
    let store = Arc::new(FsCheckpointStore::new(&config.output_dir));
    let ctx = StageContext {
        collaborators: Collaborators::unconfigured(),
        writer: Arc::new(FsArtifactWriter::new(&config.output_dir)),
        governor: Arc::new(RateGovernor::new(config.limits.clone())),
        config: Arc::clone(&config),
    };
    let engine = Arc::new(PipelineEngine::new(
        standard_set(),
        Arc::clone(&store) as _,
        ctx,
    ));
    let (events_tx, events_rx) = mpsc::channel(256);
    let registry = RunRegistry::new(engine, store, config, events_tx);
    (registry, events_rx)
}

/// Block until the run completes, fails, or pauses for review.
async fn wait_for_pause(registry: &RunRegistry, run_id: Uuid) -> color_eyre::Result<RunSummary> {
    loop {
        let summary = registry.status(run_id).await?;
        match summary.status {
            RunStatus::Pending | RunStatus::Running => {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            _ => return Ok(summary),
        }
    }
}

async fn wait_for_status(
    registry: &RunRegistry,
    run_id: Uuid,
    status: RunStatus,
) -> color_eyre::Result<()> {
    loop {
        let summary = registry.status(run_id).await?;
        if summary.status == status {
            return Ok(());
        }
        if matches!(summary.status, RunStatus::Error | RunStatus::Complete) {
            return Err(eyre!("run {run_id} ended with status {:?}", summary.status));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn print_events(mut events_rx: mpsc::Receiver<Event>) {
    while let Some(event) = events_rx.recv().await {
        match event {
            Event::RunStarted { topic, .. } => {
                println!("{} {topic}", "started".green().bold());
            }
            Event::StageStarted { stage, attempt, .. } => {
                if attempt > 1 {
                    println!("  {} {stage} (attempt {attempt})", "stage".cyan());
                } else {
                    println!("  {} {stage}", "stage".cyan());
                }
            }
            Event::StageCompleted { stage, .. } => {
                println!("  {} {stage}", "done".green());
            }
            Event::StageReplayed { stage, .. } => {
                println!("  {} {stage} (from checkpoint)", "replayed".yellow());
            }
            Event::AwaitingReview { stage, summary, .. } => {
                println!(
                    "  {} {stage}: {summary}",
                    "awaiting review".magenta().bold()
                );
            }
            Event::RunCompleted { run_id } => {
                println!("{} {run_id}", "complete".green().bold());
            }
            Event::RunFailed { kind, message, .. } => {
                println!("{} {kind:?}: {message}", "failed".red().bold());
            }
            Event::RunStatusUpdate { .. } => {}
        }
    }
}

fn report(summary: &RunSummary) {
    println!();
    println!("{}    {}", "run".bold(), summary.run_id);
    println!("{}  {}", "topic".bold(), summary.topic);
    println!("{} {:?}", "status".bold(), summary.status);
    println!("{}  {}", "stage".bold(), summary.current_stage);
    println!(
        "{}   {}/{}",
        "done".bold(),
        summary.stages_done,
        reel_protocol::StageKind::ALL.len()
    );
    if let Some(review) = &summary.pending_review {
        println!(
            "{} {}: {}",
            "review".magenta().bold(),
            review.stage,
            review.summary
        );
        println!(
            "  resolve with: reelsmith review {} approve|reject|abort",
            summary.run_id
        );
    }
    if let Some(error) = &summary.last_error {
        println!(
            "{}  {:?} at {}: {}",
            "error".red().bold(),
            error.kind,
            error.stage,
            error.message
        );
    }
}
