//! CLI command definitions and handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docgraph_core::{FileHistoryStore, HistoryStore, MemoryHistoryStore, StaticCredentials};
use docgraph_graph::{Collaborators, EngineConfig, Neo4jConnector, SyncEngine};
use docgraph_redis::RedisHistoryStore;

use crate::config::{AppConfig, HistoryConfig};
use crate::vault::{Vault, WikiLinks};

pub mod history;
pub mod mappings;
pub mod status;
pub mod sync;

/// Mirror document front matter into a Neo4j graph
#[derive(Parser)]
#[command(name = "docgraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the document vault (defaults to current directory)
    #[arg(long, global = true, env = "DOCGRAPH_VAULT")]
    pub vault: Option<PathBuf>,

    /// Config file (defaults to <vault>/docgraph.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync mappings to the graph
    Sync(sync::SyncArgs),

    /// Show or clear sync history
    History(history::HistoryArgs),

    /// Show configuration, connectivity and the latest sync
    Status,

    /// List configured mappings
    Mappings,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let vault_dir = match self.vault {
            Some(dir) => dir,
            None => std::env::current_dir().context("Cannot determine current directory")?,
        };
        let ctx = AppContext::load(&vault_dir, self.config.as_deref())?;

        match self.command {
            Commands::Sync(args) => sync::execute(args, &ctx).await,
            Commands::History(args) => history::execute(args, &ctx).await,
            Commands::Status => status::execute(&ctx).await,
            Commands::Mappings => mappings::execute(&ctx),
        }
    }
}

/// Vault and configuration shared by every command.
pub struct AppContext {
    pub vault: Vault,
    pub config: AppConfig,
}

impl AppContext {
    pub fn load(vault_dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let vault = Vault::open(vault_dir).with_context(|| format!("Cannot open vault {}", vault_dir.display()))?;
        let config = AppConfig::load(config_path, vault.root())?;
        Ok(Self { vault, config })
    }

    pub async fn history_store(&self) -> Result<Arc<dyn HistoryStore>> {
        let root = self.vault.root();
        let store: Arc<dyn HistoryStore> = match &self.config.history {
            HistoryConfig::Memory => Arc::new(MemoryHistoryStore::new()),
            HistoryConfig::File { .. } => Arc::new(FileHistoryStore::new(self.config.history_path(root))),
            HistoryConfig::Redis { .. } => {
                let url = self.config.redis_url();
                let pool = docgraph_redis::init_pool(&url)
                    .await
                    .with_context(|| format!("Cannot connect to Redis at {}", url))?;
                Arc::new(RedisHistoryStore::new(pool, &self.config.redis_namespace(root)))
            }
        };
        Ok(store)
    }

    /// Build an engine that only processes when asked to.
    pub fn engine(&self, credentials: StaticCredentials, history: Arc<dyn HistoryStore>) -> SyncEngine {
        let vault = Arc::new(self.vault.clone());
        let collaborators = Collaborators {
            documents: vault.clone(),
            reader: vault,
            links: Arc::new(WikiLinks),
            credentials: Arc::new(credentials),
            connector: Arc::new(Neo4jConnector::new(self.config.graph.connection.clone())),
            history,
        };
        SyncEngine::new(
            self.config.sync.clone(),
            collaborators,
            EngineConfig { auto_process: false },
        )
    }
}
