//! `docgraph.toml` loading.
//!
//! Lookup order: `--config`, `<vault>/docgraph.toml`, then
//! `<config dir>/docgraph/config.toml`. With no file at all the defaults are
//! used. `NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD` and `REDIS_URL` override
//! whatever the file says.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use docgraph_core::SyncSettings;
use docgraph_graph::GraphConfig;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "docgraph.toml";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub graph: GraphSection,
    pub sync: SyncSettings,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    #[serde(flatten)]
    pub connection: GraphConfig,
    pub user: String,
    pub password: Option<String>,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            connection: GraphConfig::default(),
            user: "neo4j".to_string(),
            password: None,
        }
    }
}

/// Where terminated sync items are recorded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum HistoryConfig {
    Memory,
    File {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    Redis {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        namespace: Option<String>,
    },
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self::File { path: None }
    }
}

impl AppConfig {
    pub fn load(explicit: Option<&Path>, vault: &Path) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match find_config(vault) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    tracing::debug!(vault = %vault.display(), "No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides through `lookup`. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(uri) = get("NEO4J_URI") {
            self.graph.connection.uri = uri;
        }
        if let Some(user) = get("NEO4J_USER") {
            self.graph.user = user;
        }
        if let Some(password) = get("NEO4J_PASSWORD") {
            self.graph.password = Some(password);
        }
        if let (Some(value), HistoryConfig::Redis { url, .. }) = (get("REDIS_URL"), &mut self.history) {
            *url = Some(value);
        }
    }

    /// History file, defaulting to `<vault>/.docgraph/history.json`.
    pub fn history_path(&self, vault: &Path) -> PathBuf {
        match &self.history {
            HistoryConfig::File { path: Some(path) } if path.is_absolute() => path.clone(),
            HistoryConfig::File { path: Some(path) } => vault.join(path),
            _ => vault.join(".docgraph").join("history.json"),
        }
    }

    pub fn redis_url(&self) -> String {
        match &self.history {
            HistoryConfig::Redis { url: Some(url), .. } => url.clone(),
            _ => DEFAULT_REDIS_URL.to_string(),
        }
    }

    /// Redis key namespace, defaulting to the vault directory name.
    pub fn redis_namespace(&self, vault: &Path) -> String {
        match &self.history {
            HistoryConfig::Redis { namespace: Some(ns), .. } => ns.clone(),
            _ => vault
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "default".to_string()),
        }
    }
}

fn find_config(vault: &Path) -> Option<PathBuf> {
    let local = vault.join(CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("docgraph").join("config.toml"))
        .filter(|path| path.is_file())
}
