//! docgraph CLI
//!
//! Mirrors document front matter into a Neo4j graph.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod credentials;
mod output;
mod progress;
mod vault;

use commands::Cli;

const DEFAULT_FILTER: &str = "docgraph=info,docgraph_graph=info";
const VERBOSE_FILTER: &str = "docgraph=debug,docgraph_graph=debug,docgraph_core=debug,docgraph_redis=debug";

/// Initialize tracing on stderr, plus a log file when one is given.
///
/// The returned guard flushes the file writer on drop and must outlive the command.
fn init_tracing(log_file: Option<&Path>, verbose: bool) -> Result<Option<WorkerGuard>> {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(env_filter).with(stderr).init();
        return Ok(None);
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("Cannot create log directory {}", dir.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("Invalid log file {}", path.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr)
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref(), cli.verbose)?;

    cli.execute().await
}
