//! Markdown vault as a document collection.
//!
//! Every `.md` file under the vault root is a document; its id is the file
//! stem, which is also what wiki-links refer to. Hidden directories are
//! skipped. Front matter is the YAML block delimited by `---` at the top of
//! the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docgraph_core::{
    DocGraphError, DocGraphResult, DocumentRef, DocumentSource, FrontMatter, FrontMatterReader, LinkExtractor,
};
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    pub fn open(root: impl Into<PathBuf>) -> DocGraphResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(DocGraphError::source(format!("{} is not a directory", root.display())));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the vault. When two files share a stem, the first path in walk
    /// order wins and the other is skipped with a warning.
    pub fn scan(&self) -> DocGraphResult<Vec<DocumentRef>> {
        let mut by_id: BTreeMap<String, PathBuf> = BTreeMap::new();

        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

        for entry in walker {
            let entry = entry.map_err(|e| DocGraphError::source(e.to_string()))?;
            if !entry.file_type().is_file() || !is_markdown(entry.path()) {
                continue;
            }
            let Some(id) = entry.path().file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            if let Some(existing) = by_id.get(&id) {
                warn!(
                    id = %id,
                    kept = %existing.display(),
                    skipped = %entry.path().display(),
                    "Duplicate document name"
                );
                continue;
            }
            by_id.insert(id, entry.into_path());
        }

        debug!(root = %self.root.display(), documents = by_id.len(), "Vault scanned");
        Ok(by_id.into_iter().map(|(id, path)| DocumentRef::new(id, path)).collect())
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

fn is_markdown(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
}

#[async_trait]
impl DocumentSource for Vault {
    async fn documents(&self) -> DocGraphResult<Vec<DocumentRef>> {
        let vault = self.clone();
        tokio::task::spawn_blocking(move || vault.scan())
            .await
            .map_err(|e| DocGraphError::source(format!("vault scan aborted: {}", e)))?
    }
}

#[async_trait]
impl FrontMatterReader for Vault {
    async fn read(&self, document: &DocumentRef) -> Option<FrontMatter> {
        match tokio::fs::read_to_string(&document.path).await {
            Ok(content) => parse_front_matter(&content),
            Err(e) => {
                debug!(path = %document.path.display(), error = %e, "Unreadable document");
                None
            }
        }
    }
}

/// Raw text between the opening `---` and the closing `---` or `...`.
pub fn front_matter_block(content: &str) -> Option<&str> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != "---" {
        return None;
    }

    let start = first.len();
    let mut offset = start;
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            return Some(&content[start..offset]);
        }
        offset += line.len();
    }
    None
}

/// Front matter as a JSON object. Anything that is not a YAML mapping is `None`.
pub fn parse_front_matter(content: &str) -> Option<FrontMatter> {
    let block = front_matter_block(content)?;
    let yaml: serde_yaml::Value = match serde_yaml::from_str(block) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Invalid YAML front matter");
            return None;
        }
    };
    match serde_json::to_value(yaml) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "Front matter not representable as JSON");
            None
        }
    }
}

/// Resolves `[[Target]]`, `[[Target|alias]]` and `[[Target#heading]]` links,
/// or bare document names, to document ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct WikiLinks;

impl LinkExtractor for WikiLinks {
    fn extract(&self, raw: &Value) -> Vec<String> {
        let mut targets = Vec::new();
        collect_targets(raw, &mut targets);
        let mut seen = std::collections::HashSet::new();
        targets.retain(|t| seen.insert(t.clone()));
        targets
    }
}

fn collect_targets(raw: &Value, out: &mut Vec<String>) {
    match raw {
        Value::String(s) if s.contains("[[") => {
            let mut rest = s.as_str();
            while let Some(open) = rest.find("[[") {
                let after = &rest[open + 2..];
                let Some(close) = after.find("]]") else {
                    break;
                };
                out.extend(link_target(&after[..close]));
                rest = &after[close + 2..];
            }
        }
        Value::String(s) => out.extend(link_target(s)),
        Value::Array(items) => {
            for item in items {
                collect_targets(item, out);
            }
        }
        _ => {}
    }
}

/// Document id named by a link body: alias and heading dropped, folders and
/// a `.md` suffix stripped.
fn link_target(inner: &str) -> Option<String> {
    let left = inner.split('|').next()?;
    let target = left.split('#').next()?.trim();
    let name = target.rsplit('/').next()?.trim();
    let name = name.strip_suffix(".md").unwrap_or(name).trim();
    (!name.is_empty()).then(|| name.to_string())
}
