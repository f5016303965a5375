//! Persisted history of terminated sync items.
//!
//! History is a capped, most-recent-first list. Name sets are serialized as
//! ordered lists here and nowhere else.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::DocGraphResult;
use crate::item::model::{ItemStats, NameCounts, RowError, SyncItem, SyncKind, SyncScope, SyncStatus};
use crate::names::NameSet;

/// Maximum number of retained history entries.
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub kind: SyncKind,
    pub scope: SyncScope,
    pub names: Vec<String>,
    pub status: SyncStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub duration_ms: Option<u64>,
    pub message: Option<String>,
    pub total: usize,
    pub successes: usize,
    pub errors: usize,
    pub stats: ItemStats,
    #[serde(default)]
    pub name_counts: BTreeMap<String, NameCounts>,
    #[serde(default)]
    pub row_errors: Vec<RowError>,
}

impl HistoryEntry {
    /// Name set restored from its persisted list.
    pub fn name_set(&self) -> NameSet {
        self.names.iter().cloned().collect()
    }
}

impl From<SyncItem> for HistoryEntry {
    fn from(item: SyncItem) -> Self {
        Self {
            id: item.id,
            kind: item.kind,
            scope: item.scope,
            names: item.names.to_vec(),
            status: item.status,
            started_at: item.started_at,
            completed_at: item.completed_at,
            success: item.success,
            duration_ms: item.duration_ms,
            message: item.message,
            total: item.total,
            successes: item.successes,
            errors: item.errors,
            stats: item.stats,
            name_counts: item.name_counts,
            row_errors: item.row_errors,
        }
    }
}

/// Insert `entry` at the front and drop anything past the cap.
pub fn push_capped(entries: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    entries.insert(0, entry);
    entries.truncate(HISTORY_LIMIT);
}

/// Storage for history entries, newest first.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn load(&self) -> DocGraphResult<Vec<HistoryEntry>>;
    async fn record(&self, entry: HistoryEntry) -> DocGraphResult<()>;
    async fn clear(&self) -> DocGraphResult<()>;
}

/// History kept for the lifetime of the process.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self) -> DocGraphResult<Vec<HistoryEntry>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn record(&self, entry: HistoryEntry) -> DocGraphResult<()> {
        push_capped(&mut *self.entries.lock().await, entry);
        Ok(())
    }

    async fn clear(&self) -> DocGraphResult<()> {
        self.entries.lock().await.clear();
        Ok(())
    }
}

/// History stored as a JSON array in a file.
pub struct FileHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries on disk. `None` when the file is not a JSON array at all.
    async fn read_entries(&self) -> DocGraphResult<Option<Vec<HistoryEntry>>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Some(Vec::new())),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }
        match serde_json::from_str::<Vec<serde_json::Value>>(&content) {
            Ok(values) => Ok(Some(decode_entries(values))),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "History file is unreadable");
                Ok(None)
            }
        }
    }

    /// Move an unreadable file aside so recording can start over.
    async fn set_aside(&self) -> DocGraphResult<()> {
        let backup = self.path.with_extension("json.corrupt");
        tokio::fs::rename(&self.path, &backup).await?;
        warn!(backup = %backup.display(), "Unreadable history moved aside; starting a new history");
        Ok(())
    }

    async fn write_entries(&self, entries: &[HistoryEntry]) -> DocGraphResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), entries = entries.len(), "History written");
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn load(&self) -> DocGraphResult<Vec<HistoryEntry>> {
        let mut entries = self.read_entries().await?.unwrap_or_default();
        entries.truncate(HISTORY_LIMIT);
        Ok(entries)
    }

    async fn record(&self, entry: HistoryEntry) -> DocGraphResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = match self.read_entries().await? {
            Some(entries) => entries,
            None => {
                self.set_aside().await?;
                Vec::new()
            }
        };
        push_capped(&mut entries, entry);
        self.write_entries(&entries).await
    }

    async fn clear(&self) -> DocGraphResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_entries(&[]).await
    }
}

fn decode_entries(values: Vec<serde_json::Value>) -> Vec<HistoryEntry> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable history entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::model::SyncOutcome;

    fn finished(name: &str) -> HistoryEntry {
        let mut item = SyncItem::new(SyncKind::NodeProperty, SyncScope::Selected, NameSet::single(name));
        item.start();
        item.complete(SyncOutcome::new(SyncKind::NodeProperty));
        item.into()
    }

    #[test]
    fn test_entry_serializes_names_as_list() {
        let mut item = SyncItem::new(
            SyncKind::Label,
            SyncScope::Full,
            ["B", "A"].into_iter().collect(),
        );
        item.fail("no credentials");
        let entry = HistoryEntry::from(item);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["names"], serde_json::json!(["A", "B"]));
        assert_eq!(json["status"], "error");
        assert_eq!(json["stats"]["kind"], "label");
        assert_eq!(entry.name_set().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_caps_newest_first() {
        let store = MemoryHistoryStore::new();
        for i in 0..(HISTORY_LIMIT + 7) {
            store.record(finished(&format!("p{}", i))).await.unwrap();
        }
        let entries = store.load().await.unwrap();
        assert_eq!(entries.len(), HISTORY_LIMIT);
        assert_eq!(entries[0].names, vec![format!("p{}", HISTORY_LIMIT + 6)]);
        assert_eq!(entries[HISTORY_LIMIT - 1].names, vec!["p7".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path().join("nested").join("history.json"));
        assert!(store.load().await.unwrap().is_empty());

        store.record(finished("first")).await.unwrap();
        store.record(finished("second")).await.unwrap();

        let reopened = FileHistoryStore::new(store.path().to_path_buf());
        let entries = reopened.load().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].names, vec!["second".to_string()]);

        reopened.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_recovers_from_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileHistoryStore::new(path.clone());
        assert!(store.load().await.unwrap().is_empty());

        store.record(finished("first")).await.unwrap();
        store.record(finished("second")).await.unwrap();

        let entries = store.load().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].names, vec!["second".to_string()]);
        let backup = std::fs::read_to_string(dir.path().join("history.json.corrupt")).unwrap();
        assert_eq!(backup, "{not json");
    }

    #[tokio::test]
    async fn test_file_store_skips_unreadable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let good = serde_json::to_value(finished("kept")).unwrap();
        std::fs::write(&path, serde_json::json!([{ "id": "broken" }, good]).to_string()).unwrap();
        let store = FileHistoryStore::new(path);

        let entries = store.load().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].names, vec!["kept".to_string()]);

        store.record(finished("next")).await.unwrap();
        assert_eq!(store.load().await.unwrap().len(), 2);
    }
}
