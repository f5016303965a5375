//! `docgraph status`: configuration, connectivity and the latest sync.

use anyhow::Result;
use colored::Colorize;
use docgraph_core::{CredentialProvider, DocGraphError, DocumentSource, SyncKind};
use docgraph_graph::GraphClient;

use super::AppContext;
use crate::config::HistoryConfig;
use crate::credentials::ConfigCredentials;
use crate::output;

pub async fn execute(ctx: &AppContext) -> Result<()> {
    let config = &ctx.config;
    let root = ctx.vault.root();

    println!("{}", "docgraph status".cyan().bold());
    println!();
    println!("{:<14} {}", "Vault:".bold(), root.display());

    match ctx.vault.documents().await {
        Ok(docs) => println!("{:<14} {}", "Documents:".bold(), docs.len()),
        Err(e) => println!("{:<14} {}", "Documents:".bold(), e.to_string().red()),
    }

    let enabled: Vec<String> = SyncKind::ALL
        .iter()
        .map(|kind| format!("{} {}", config.sync.enabled_names(*kind).len(), kind))
        .collect();
    println!("{:<14} {}", "Enabled:".bold(), enabled.join(", "));

    let backend = match &config.history {
        HistoryConfig::Memory => "memory".to_string(),
        HistoryConfig::File { .. } => format!("file {}", config.history_path(root).display()),
        HistoryConfig::Redis { .. } => format!("redis {}", config.redis_url()),
    };
    println!("{:<14} {}", "History:".bold(), backend);

    println!();
    println!("{:<14} {}", "Neo4j:".bold(), config.graph.connection.uri);
    let provider = ConfigCredentials::from_config(&config.graph);
    match provider.credentials() {
        Ok(credentials) => match GraphClient::connect(&config.graph.connection, &credentials).await {
            Ok(_) => println!("{:<14} {}", "Connection:".bold(), "ok".green()),
            Err(e) => println!("{:<14} {}", "Connection:".bold(), e.to_string().red()),
        },
        Err(DocGraphError::PromptRequired) => println!(
            "{:<14} {}",
            "Connection:".bold(),
            "no password configured (set NEO4J_PASSWORD)".yellow()
        ),
        Err(e) => println!("{:<14} {}", "Connection:".bold(), e.to_string().red()),
    }

    println!();
    match ctx.history_store().await {
        Ok(store) => match store.load().await {
            Ok(entries) => {
                println!("{}", "Latest sync".bold());
                output::print_history_table(&entries[..entries.len().min(1)]);
            }
            Err(e) => println!("{:<14} {}", "History:".bold(), e.to_string().red()),
        },
        Err(e) => println!("{:<14} {}", "History:".bold(), format!("{:#}", e).red()),
    }

    Ok(())
}
