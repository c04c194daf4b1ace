mod demo;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use spool_core::config::TaskSettings;
use spool_core::{ListQuery, ManagerBuilder, SubmitRequest, TaskManager, WaitOutcome};

use crate::demo::DemoEngine;

/// Submit a batch of demo ingestion tasks and watch them run.
#[derive(Debug, Parser)]
#[command(name = "spool", version)]
struct Args {
    /// Group the tasks are submitted under.
    #[arg(long, default_value = "demo")]
    group: String,

    /// Number of tasks to submit.
    #[arg(long, default_value_t = 8)]
    tasks: usize,

    /// Concurrent tasks per group. Overrides SPOOL_MAX_WORKERS_PER_GROUP.
    #[arg(long)]
    capacity: Option<usize>,

    /// Steps each task sleeps through.
    #[arg(long, default_value_t = 5)]
    steps: u32,

    /// Milliseconds per step.
    #[arg(long, default_value_t = 200)]
    step_ms: u64,

    /// Every n-th task fails half way.
    #[arg(long)]
    fail_every: Option<usize>,

    /// Cancel this many of the most recently submitted tasks right away.
    #[arg(long, default_value_t = 0)]
    cancel_last: usize,

    /// Seconds to wait for each task.
    #[arg(long, env = "SPOOL_WAIT_SECS")]
    wait_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut settings = TaskSettings::from_env();
    if let Some(capacity) = args.capacity {
        settings.max_workers_per_group = capacity;
    }

    let manager = ManagerBuilder::new()
        .engine(Arc::new(DemoEngine::new(
            args.steps,
            Duration::from_millis(args.step_ms),
        )))
        .settings(settings)
        .build()
        .context("failed to build task manager")?;

    tokio::select! {
        result = run(&manager, &args) => result?,
        _ = tokio::signal::ctrl_c() => warn!("interrupted"),
    }

    manager.shutdown().await;
    Ok(())
}

async fn run(manager: &TaskManager, args: &Args) -> Result<()> {
    let mut ids = Vec::with_capacity(args.tasks);
    for i in 1..=args.tasks {
        let fail = args.fail_every.is_some_and(|n| n > 0 && i % n == 0);
        let payload = json!({
            "episode_body": format!("episode {i}"),
            "fail": fail,
        });
        let id = manager
            .submit_task(SubmitRequest::new(&args.group, payload).with_name(format!("episode-{i}")))
            .context("submit rejected")?;
        ids.push(id.to_string());
    }
    info!(submitted = ids.len(), group_id = %args.group, "batch submitted");

    for id in ids.iter().rev().take(args.cancel_last) {
        let outcome = manager.cancel_task(id)?;
        info!(task_id = %id, ?outcome, "cancel sent");
    }

    println!("{}", serde_json::to_string_pretty(&manager.stats())?);

    let timeout = args.wait_secs.map(Duration::from_secs);
    for id in &ids {
        match manager.wait_for_task(id, timeout).await? {
            WaitOutcome::Finished { task, waited } => {
                info!(task_id = %id, status = %task.status, waited_ms = waited.as_millis() as u64, "done");
            }
            WaitOutcome::TimedOut { task, .. } => {
                warn!(task_id = %id, status = %task.status, "still running after wait");
            }
        }
    }

    let tasks = manager.list_tasks(ListQuery::default().group(&args.group))?;
    println!("{}", serde_json::to_string_pretty(&tasks)?);
    println!("{}", serde_json::to_string_pretty(&manager.stats())?);
    Ok(())
}
