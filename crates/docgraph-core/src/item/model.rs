//! Sync item domain models.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::names::NameSet;

/// What a sync item writes to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    NodeProperty,
    Relationship,
    Label,
}

impl SyncKind {
    /// Every kind, in the order a full sync enqueues them.
    pub const ALL: [SyncKind; 3] = [Self::NodeProperty, Self::Relationship, Self::Label];

    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "node_property" | "property" | "properties" => Some(Self::NodeProperty),
            "relationship" | "relationships" => Some(Self::Relationship),
            "label" | "labels" => Some(Self::Label),
            _ => None,
        }
    }

    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeProperty => "node_property",
            Self::Relationship => "relationship",
            Self::Label => "label",
        }
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an item was requested for specific names or for every enabled mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncScope {
    Selected,
    Full,
}

/// Lifecycle status of a sync item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Queued,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// Failure taxonomy for row- and batch-level errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Network,
    Transaction,
    SourceMissing,
    TargetFailure,
    Validation,
    InvalidType,
    QueryExecution,
    #[default]
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "NETWORK",
            Self::Transaction => "TRANSACTION",
            Self::SourceMissing => "SOURCE_MISSING",
            Self::TargetFailure => "TARGET_FAILURE",
            Self::Validation => "VALIDATION",
            Self::InvalidType => "INVALID_TYPE",
            Self::QueryExecution => "QUERY_EXECUTION",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured error attached to a sync item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub document: Option<String>,
    pub name: Option<String>,
    pub category: ErrorCategory,
    pub message: String,
}

impl RowError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            document: None,
            name: None,
            category,
            message: message.into(),
        }
    }

    pub fn for_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn for_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Per-name success and error counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameCounts {
    pub successes: usize,
    pub errors: usize,
}

/// Kind-specific write statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemStats {
    NodeProperty {
        nodes_created: u64,
        nodes_updated: u64,
        properties_set: u64,
    },
    Relationship {
        relationships_created: u64,
        relationships_updated: u64,
        placeholder_nodes_created: u64,
    },
    Label {
        labels_applied: u64,
        labels_removed: u64,
    },
}

impl ItemStats {
    /// Zeroed statistics for a kind.
    pub fn empty(kind: SyncKind) -> Self {
        match kind {
            SyncKind::NodeProperty => Self::NodeProperty {
                nodes_created: 0,
                nodes_updated: 0,
                properties_set: 0,
            },
            SyncKind::Relationship => Self::Relationship {
                relationships_created: 0,
                relationships_updated: 0,
                placeholder_nodes_created: 0,
            },
            SyncKind::Label => Self::Label {
                labels_applied: 0,
                labels_removed: 0,
            },
        }
    }

    /// One-line summary for terminal output.
    pub fn summary(&self) -> String {
        match self {
            Self::NodeProperty { nodes_created, nodes_updated, properties_set } => format!(
                "{} nodes created, {} updated, {} properties set",
                nodes_created, nodes_updated, properties_set
            ),
            Self::Relationship { relationships_created, relationships_updated, placeholder_nodes_created } => format!(
                "{} relationships created, {} updated, {} placeholder nodes",
                relationships_created, relationships_updated, placeholder_nodes_created
            ),
            Self::Label { labels_applied, labels_removed } => {
                format!("{} labels applied, {} removed", labels_applied, labels_removed)
            }
        }
    }
}

/// What an executor reports back for one sync item.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub cancelled: bool,
    /// Set when the item's transaction could not be committed.
    pub failure: Option<String>,
    pub total: usize,
    pub successes: usize,
    pub errors: usize,
    pub stats: ItemStats,
    pub name_counts: BTreeMap<String, NameCounts>,
    pub row_errors: Vec<RowError>,
}

impl SyncOutcome {
    pub fn new(kind: SyncKind) -> Self {
        Self {
            cancelled: false,
            failure: None,
            total: 0,
            successes: 0,
            errors: 0,
            stats: ItemStats::empty(kind),
            name_counts: BTreeMap::new(),
            row_errors: Vec::new(),
        }
    }

    /// Count one successful row, crediting every name it carried.
    pub fn row_succeeded<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        self.successes += 1;
        for name in names {
            self.name_counts.entry(name.to_string()).or_default().successes += 1;
        }
    }

    /// Count one failed row, charging every name it carried.
    pub fn row_failed<'a>(&mut self, names: impl IntoIterator<Item = &'a str>, error: RowError) {
        self.errors += 1;
        for name in names {
            self.name_counts.entry(name.to_string()).or_default().errors += 1;
        }
        self.row_errors.push(error);
    }

    /// Record an error against a whole name (no document involved).
    pub fn name_failed(&mut self, name: &str, error: RowError) {
        self.row_failed([name], error.for_name(name));
    }

    /// Turn every attributed success into a failure, e.g. after a failed commit.
    pub fn revoke_successes(&mut self, category: ErrorCategory, message: impl Into<String>) {
        let message = message.into();
        self.errors += self.successes;
        self.successes = 0;
        for counts in self.name_counts.values_mut() {
            counts.errors += counts.successes;
            counts.successes = 0;
        }
        self.row_errors.push(RowError::new(category, message.clone()));
        self.failure = Some(message);
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failure.is_none() && self.errors == 0
    }
}

/// One queued or executing unit of work.
#[derive(Debug, Clone)]
pub struct SyncItem {
    pub id: String,
    pub kind: SyncKind,
    pub scope: SyncScope,
    pub names: NameSet,
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
    pub name_counts: BTreeMap<String, NameCounts>,
    pub row_errors: Vec<RowError>,
}

impl SyncItem {
    /// Create a new queued item.
    pub fn new(kind: SyncKind, scope: SyncScope, names: NameSet) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            scope,
            names,
            status: SyncStatus::Queued,
            started_at: None,
            completed_at: None,
            success: false,
            duration_ms: None,
            message: None,
            total: 0,
            successes: 0,
            errors: 0,
            stats: ItemStats::empty(kind),
            name_counts: BTreeMap::new(),
            row_errors: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.scope == SyncScope::Full
    }

    /// Mark the item as executing.
    pub fn start(&mut self) {
        self.status = SyncStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    /// Copy running counters from a partial outcome.
    pub fn track(&mut self, outcome: &SyncOutcome) {
        self.total = outcome.total;
        self.successes = outcome.successes;
        self.errors = outcome.errors;
    }

    /// Close the item with an executor outcome.
    pub fn complete(&mut self, outcome: SyncOutcome) {
        self.status = if outcome.cancelled {
            SyncStatus::Cancelled
        } else if outcome.failure.is_some() || (outcome.successes == 0 && outcome.errors > 0) {
            SyncStatus::Error
        } else {
            SyncStatus::Completed
        };
        self.success = outcome.is_success();
        self.message = Some(describe(&outcome));
        self.track(&outcome);
        self.stats = outcome.stats;
        self.name_counts = outcome.name_counts;
        self.row_errors = outcome.row_errors;
        self.close();
    }

    /// Close the item after a setup failure that prevented execution.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = SyncStatus::Error;
        self.success = false;
        self.message = Some(message.into());
        self.close();
    }

    fn close(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64);
    }
}

fn describe(outcome: &SyncOutcome) -> String {
    if outcome.cancelled {
        return format!(
            "Cancelled after {} of {} rows; changes rolled back",
            outcome.successes + outcome.errors,
            outcome.total
        );
    }
    if let Some(failure) = &outcome.failure {
        return format!("Sync failed: {}", failure);
    }
    if outcome.total == 0 && outcome.errors == 0 {
        return "Nothing to sync".to_string();
    }
    match outcome.errors {
        0 => format!("Synced {} of {} rows", outcome.successes, outcome.total),
        1 => format!("Synced {} of {} rows (1 error)", outcome.successes, outcome.total),
        n => format!("Synced {} of {} rows ({} errors)", outcome.successes, outcome.total, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in SyncKind::ALL {
            assert_eq!(SyncKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(SyncKind::from_str("labels"), Some(SyncKind::Label));
        assert_eq!(SyncKind::from_str("bogus"), None);
    }

    #[test]
    fn test_outcome_counts_per_name() {
        let mut outcome = SyncOutcome::new(SyncKind::NodeProperty);
        outcome.total = 3;
        outcome.row_succeeded(["Status", "Owner"]);
        outcome.row_succeeded(["Status"]);
        outcome.row_failed(
            ["Owner"],
            RowError::new(ErrorCategory::QueryExecution, "boom").for_document("c"),
        );

        assert_eq!(outcome.successes, 2);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.name_counts["Status"], NameCounts { successes: 2, errors: 0 });
        assert_eq!(outcome.name_counts["Owner"], NameCounts { successes: 1, errors: 1 });
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_complete_with_partial_errors_is_completed() {
        let mut item = SyncItem::new(SyncKind::Label, SyncScope::Selected, NameSet::single("DONE"));
        item.start();
        let mut outcome = SyncOutcome::new(SyncKind::Label);
        outcome.total = 2;
        outcome.row_succeeded(["DONE"]);
        outcome.row_failed(["DONE"], RowError::new(ErrorCategory::SourceMissing, "missing"));
        item.complete(outcome);

        assert_eq!(item.status, SyncStatus::Completed);
        assert!(!item.success);
        assert_eq!(item.message.as_deref(), Some("Synced 1 of 2 rows (1 error)"));
        assert!(item.completed_at.is_some());
        assert!(item.duration_ms.is_some());
    }

    #[test]
    fn test_complete_all_failed_is_error() {
        let mut item = SyncItem::new(SyncKind::Label, SyncScope::Selected, NameSet::single("X"));
        item.start();
        let mut outcome = SyncOutcome::new(SyncKind::Label);
        outcome.name_failed("x", RowError::new(ErrorCategory::Validation, "invalid label"));
        item.complete(outcome);
        assert_eq!(item.status, SyncStatus::Error);
        assert_eq!(item.row_errors[0].name.as_deref(), Some("x"));
    }

    #[test]
    fn test_revoke_successes_after_commit_failure() {
        let mut outcome = SyncOutcome::new(SyncKind::NodeProperty);
        outcome.total = 2;
        outcome.row_succeeded(["Status"]);
        outcome.row_succeeded(["Status"]);
        outcome.revoke_successes(ErrorCategory::Transaction, "commit failed");

        assert_eq!(outcome.successes, 0);
        assert_eq!(outcome.errors, 2);
        assert_eq!(outcome.name_counts["Status"], NameCounts { successes: 0, errors: 2 });
        assert_eq!(outcome.row_errors.len(), 1);

        let mut item = SyncItem::new(SyncKind::NodeProperty, SyncScope::Selected, NameSet::single("Status"));
        item.complete(outcome);
        assert_eq!(item.status, SyncStatus::Error);
    }

    #[test]
    fn test_cancelled_outcome() {
        let mut item = SyncItem::new(SyncKind::Relationship, SyncScope::Full, NameSet::single("links"));
        let mut outcome = SyncOutcome::new(SyncKind::Relationship);
        outcome.total = 10;
        outcome.row_succeeded(["links"]);
        outcome.cancelled = true;
        item.complete(outcome);
        assert_eq!(item.status, SyncStatus::Cancelled);
        assert!(!item.success);
        assert!(item.is_full());
    }

    #[test]
    fn test_error_category_serializes_screaming() {
        let json = serde_json::to_string(&ErrorCategory::SourceMissing).unwrap();
        assert_eq!(json, "\"SOURCE_MISSING\"");
    }
}
