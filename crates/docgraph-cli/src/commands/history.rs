//! `docgraph history`: list or clear recorded sync items.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use super::AppContext;
use crate::output;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Number of entries to show
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,

    /// Delete the recorded history
    #[arg(long)]
    pub clear: bool,

    /// Show row errors for each entry
    #[arg(long)]
    pub details: bool,
}

pub async fn execute(args: HistoryArgs, ctx: &AppContext) -> Result<()> {
    let store = ctx.history_store().await?;

    if args.clear {
        store.clear().await.context("Failed to clear sync history")?;
        println!("{} Sync history cleared", "✓".green().bold());
        return Ok(());
    }

    let mut entries = store.load().await.context("Failed to load sync history")?;
    entries.truncate(args.limit);
    if args.details {
        output::print_results(&entries);
    } else {
        output::print_history_table(&entries);
    }
    Ok(())
}
