//! Sync history stored as a Redis list, newest entry at the head.

use async_trait::async_trait;
use docgraph_core::{DocGraphResult, HISTORY_LIMIT, HistoryEntry, HistoryStore};
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::client::{RedisPool, RedisResult};

pub struct RedisHistoryStore {
    pool: RedisPool,
    key: String,
}

impl RedisHistoryStore {
    /// History for one vault. `namespace` keeps vaults sharing a server apart.
    pub fn new(pool: RedisPool, namespace: &str) -> Self {
        Self {
            pool,
            key: history_key(namespace),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn push(&self, entry: &HistoryEntry) -> RedisResult<()> {
        let mut conn = self.pool.clone();
        let json = serde_json::to_string(entry)?;
        conn.lpush::<_, _, ()>(&self.key, json).await?;
        conn.ltrim::<_, ()>(&self.key, 0, HISTORY_LIMIT as isize - 1).await?;
        Ok(())
    }

    async fn entries(&self) -> RedisResult<Vec<HistoryEntry>> {
        let mut conn = self.pool.clone();
        let raw: Vec<String> = conn.lrange(&self.key, 0, HISTORY_LIMIT as isize - 1).await?;
        Ok(decode_entries(&raw))
    }

    async fn delete(&self) -> RedisResult<()> {
        let mut conn = self.pool.clone();
        conn.del::<_, ()>(&self.key).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn load(&self) -> DocGraphResult<Vec<HistoryEntry>> {
        Ok(self.entries().await?)
    }

    async fn record(&self, entry: HistoryEntry) -> DocGraphResult<()> {
        self.push(&entry).await?;
        debug!(key = %self.key, item_id = %entry.id, "History entry recorded");
        Ok(())
    }

    async fn clear(&self) -> DocGraphResult<()> {
        Ok(self.delete().await?)
    }
}

fn history_key(namespace: &str) -> String {
    format!("docgraph:{}:history", namespace)
}

/// Entries that no longer parse are skipped rather than failing the whole list.
fn decode_entries(raw: &[String]) -> Vec<HistoryEntry> {
    raw.iter()
        .filter_map(|json| match serde_json::from_str(json) {
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
    use docgraph_core::{ItemStats, SyncKind, SyncScope, SyncStatus};

    fn entry(id: &str) -> HistoryEntry {
        HistoryEntry {
            id: id.to_string(),
            kind: SyncKind::Label,
            scope: SyncScope::Selected,
            names: vec!["DONE".to_string()],
            status: SyncStatus::Completed,
            started_at: Some(chrono::Utc::now()),
            completed_at: Some(chrono::Utc::now()),
            success: true,
            duration_ms: Some(3),
            message: None,
            total: 1,
            successes: 1,
            errors: 0,
            stats: ItemStats::empty(SyncKind::Label),
            name_counts: Default::default(),
            row_errors: Vec::new(),
        }
    }

    #[test]
    fn test_key_is_namespaced() {
        assert_eq!(history_key("notes"), "docgraph:notes:history");
    }

    #[test]
    fn test_decode_skips_corrupt_entries() {
        let raw = vec![
            serde_json::to_string(&entry("b")).unwrap(),
            "{not json".to_string(),
            serde_json::to_string(&entry("a")).unwrap(),
        ];
        let decoded = decode_entries(&raw);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].id, "b");
        assert_eq!(decoded[1].id, "a");
    }
}
