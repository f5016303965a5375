//! `docgraph sync`: enqueue items, drive the loop and report.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use docgraph_core::{HistoryEntry, SyncKind, SyncStatus};
use docgraph_graph::SyncEngine;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use super::AppContext;
use crate::credentials::{self, ConfigCredentials};
use crate::output;
use crate::progress::ProgressReporter;

#[derive(Args, Debug, Default)]
pub struct SyncArgs {
    /// Sync every enabled mapping of every kind
    #[arg(long)]
    pub full: bool,

    /// Front-matter property to sync (repeatable)
    #[arg(long = "property", value_name = "NAME")]
    pub properties: Vec<String>,

    /// Relationship mapping to sync (repeatable)
    #[arg(long = "relationship", value_name = "NAME")]
    pub relationships: Vec<String>,

    /// Label mapping to sync (repeatable)
    #[arg(long = "label", value_name = "NAME")]
    pub labels: Vec<String>,

    /// Seconds to wait after Ctrl-C before the running item is cancelled
    #[arg(long, default_value_t = 5)]
    pub grace: u64,
}

impl SyncArgs {
    fn selected(&self) -> [(SyncKind, &[String]); 3] {
        [
            (SyncKind::NodeProperty, self.properties.as_slice()),
            (SyncKind::Relationship, self.relationships.as_slice()),
            (SyncKind::Label, self.labels.as_slice()),
        ]
    }

    /// No names given means a full sync.
    fn wants_full(&self) -> bool {
        self.full || self.selected().iter().all(|(_, names)| names.is_empty())
    }
}

pub async fn execute(args: SyncArgs, ctx: &AppContext) -> Result<()> {
    ctx.config.sync.validate().context("Invalid sync settings")?;
    let credentials = credentials::resolve(&ConfigCredentials::from_config(&ctx.config.graph))?;
    let history = ctx.history_store().await?;
    let engine = ctx.engine(credentials, history);

    let ids = enqueue(&engine, &args);
    if ids.is_empty() {
        println!("{}", "Nothing to sync: no mappings are enabled.".dimmed());
        return Ok(());
    }
    tracing::debug!(items = ids.len(), "Sync items queued");

    let reporter = ProgressReporter::attach(engine.state());
    let worker = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.process_queue().await })
    };
    let driven = drive(&engine, worker, Duration::from_secs(args.grace), &reporter).await;
    reporter.finish(engine.state());
    driven?;

    let mut entries: Vec<HistoryEntry> = engine
        .history()
        .await
        .context("Failed to load sync history")?
        .into_iter()
        .filter(|entry| ids.contains(&entry.id))
        .collect();
    entries.reverse();
    output::print_results(&entries);

    let failed = entries.iter().filter(|e| e.status == SyncStatus::Error).count();
    if failed > 0 {
        anyhow::bail!("{} of {} sync items failed", failed, entries.len());
    }
    Ok(())
}

/// Queue the requested items and return their ids in queue order.
fn enqueue(engine: &SyncEngine, args: &SyncArgs) -> Vec<String> {
    let mut ids = Vec::new();
    if args.wants_full() {
        ids.extend(engine.add_full_sync());
    }
    for (kind, names) in args.selected() {
        for name in names {
            let id = engine.add_selected_sync(kind, name);
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

async fn drive(
    engine: &SyncEngine,
    mut worker: JoinHandle<()>,
    grace: Duration,
    reporter: &ProgressReporter,
) -> Result<()> {
    loop {
        tokio::select! {
            joined = &mut worker => {
                joined.context("Sync loop stopped unexpectedly")?;
                return Ok(());
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Cannot listen for Ctrl-C")?;
                interrupt(engine, grace, reporter).await;
            }
        }
    }
}

/// First Ctrl-C pauses and starts the grace period. Enter resumes, a second
/// Ctrl-C or the end of the grace period cancels the item and drops the rest
/// of the queue.
async fn interrupt(engine: &SyncEngine, grace: Duration, reporter: &ProgressReporter) {
    if engine.state().queue().current.is_none() {
        drop_queued(engine);
        return;
    }

    reporter.println(format!(
        "{} Cancelling in {}s. Press Enter to keep syncing, Ctrl-C to cancel now.",
        "!".yellow().bold(),
        grace.as_secs()
    ));
    let pending = engine.cancel_with_grace(grace);
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    let cancelled = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            drop_queued(engine);
            pending.cancel_now().await
        }
        read = stdin.read_line(&mut line) => {
            if matches!(read, Ok(n) if n > 0) && pending.undo().await {
                reporter.println(format!("{} Resumed", "→".cyan()));
                return;
            }
            drop_queued(engine);
            pending.cancel_now().await
        }
        _ = tokio::time::sleep(grace) => {
            drop_queued(engine);
            pending.cancel_now().await
        }
    };
    if cancelled {
        reporter.println(format!("{} Cancelled, rolling back", "⊘".yellow().bold()));
    }
}

fn drop_queued(engine: &SyncEngine) {
    for item in engine.state().queue().queue {
        engine.remove_item(&item.id);
    }
}
