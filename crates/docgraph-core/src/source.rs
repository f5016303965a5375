//! Collaborator contracts the sync engine consumes.
//!
//! The engine never reads files or prompts for passwords itself; it is handed
//! implementations of these traits.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{DocGraphError, DocGraphResult};

/// Front-matter values of one document, keyed by property name.
pub type FrontMatter = serde_json::Map<String, Value>;

/// A document in the collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentRef {
    /// Stable id; doubles as the node key in the graph.
    pub id: String,
    pub path: PathBuf,
}

impl DocumentRef {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// Lists candidate documents.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn documents(&self) -> DocGraphResult<Vec<DocumentRef>>;
}

/// Reads a document's front matter; `None` when it has none.
#[async_trait]
pub trait FrontMatterReader: Send + Sync {
    async fn read(&self, document: &DocumentRef) -> Option<FrontMatter>;
}

/// Turns a raw link-property value into target document ids.
pub trait LinkExtractor: Send + Sync {
    fn extract(&self, raw: &Value) -> Vec<String>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub principal: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("principal", &self.principal)
            .field("secret", &"***")
            .finish()
    }
}

/// Supplies graph credentials.
///
/// Returns [`DocGraphError::PromptRequired`] when credentials must be asked
/// for interactively.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> DocGraphResult<Credentials>;
}

/// Fixed credentials, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<Credentials>);

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(Some(credentials))
    }

    pub fn missing() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self) -> DocGraphResult<Credentials> {
        self.0.clone().ok_or(DocGraphError::PromptRequired)
    }
}

/// In-memory document collection, used by embedders and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocuments {
    documents: BTreeMap<String, Option<FrontMatter>>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document. A non-object `front_matter` means "no front matter".
    pub fn with(mut self, id: &str, front_matter: Value) -> Self {
        let fm = match front_matter {
            Value::Object(map) => Some(map),
            _ => None,
        };
        self.documents.insert(id.to_string(), fm);
        self
    }
}

#[async_trait]
impl DocumentSource for InMemoryDocuments {
    async fn documents(&self) -> DocGraphResult<Vec<DocumentRef>> {
        Ok(self
            .documents
            .keys()
            .map(|id| DocumentRef::new(id.clone(), format!("{}.md", id)))
            .collect())
    }
}

#[async_trait]
impl FrontMatterReader for InMemoryDocuments {
    async fn read(&self, document: &DocumentRef) -> Option<FrontMatter> {
        self.documents.get(&document.id).cloned().flatten()
    }
}
