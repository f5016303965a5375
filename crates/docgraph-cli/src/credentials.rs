//! Graph credentials from config and environment, with an interactive fallback.

use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use docgraph_core::{CredentialProvider, Credentials, DocGraphError, DocGraphResult, StaticCredentials};

use crate::config::GraphSection;

/// Credentials taken from `[graph]` after environment overrides.
#[derive(Debug, Clone)]
pub struct ConfigCredentials {
    user: String,
    password: Option<String>,
}

impl ConfigCredentials {
    pub fn from_config(graph: &GraphSection) -> Self {
        Self {
            user: graph.user.clone(),
            password: graph.password.clone(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl CredentialProvider for ConfigCredentials {
    fn credentials(&self) -> DocGraphResult<Credentials> {
        match &self.password {
            Some(password) if !password.is_empty() => Ok(Credentials::new(self.user.clone(), password.clone())),
            _ => Err(DocGraphError::PromptRequired),
        }
    }
}

/// Resolve credentials up front, prompting on the terminal when the config
/// has no password.
pub fn resolve(provider: &ConfigCredentials) -> Result<StaticCredentials> {
    match provider.credentials() {
        Ok(credentials) => Ok(StaticCredentials::new(credentials)),
        Err(DocGraphError::PromptRequired) => prompt(provider.user()).map(StaticCredentials::new),
        Err(e) => Err(e.into()),
    }
}

fn prompt(default_user: &str) -> Result<Credentials> {
    let user: String = Input::new()
        .with_prompt("Neo4j user")
        .default(default_user.to_string())
        .interact_text()
        .context("Failed to read Neo4j user")?;
    let password = Password::new()
        .with_prompt("Neo4j password")
        .interact()
        .context("Failed to read Neo4j password")?;
    Ok(Credentials::new(user, password))
}
