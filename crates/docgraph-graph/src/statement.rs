//! Parameterized statements and their results.

use std::collections::BTreeMap;

use docgraph_core::GraphValue;

/// How a returned column is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    StringList,
}

/// Counter columns a write statement may return. Drivers fold them into
/// [`QuerySummary`] instead of leaving callers to re-query.
pub const NODES_CREATED: &str = "nodes_created";
pub const NODES_UPDATED: &str = "nodes_updated";
pub const RELATIONSHIPS_CREATED: &str = "relationships_created";
pub const RELATIONSHIPS_UPDATED: &str = "relationships_updated";
pub const PROPERTIES_SET: &str = "properties_set";
pub const LABELS_ADDED: &str = "labels_added";
pub const LABELS_REMOVED: &str = "labels_removed";

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Short operation name, used in logs.
    pub operation: &'static str,
    pub text: String,
    pub params: BTreeMap<String, GraphValue>,
    pub columns: Vec<(String, ColumnKind)>,
}

impl Statement {
    pub fn new(operation: &'static str, text: impl Into<String>) -> Self {
        Self {
            operation,
            text: text.into(),
            params: BTreeMap::new(),
            columns: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<GraphValue>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Declare a returned column.
    pub fn column(mut self, name: &str, kind: ColumnKind) -> Self {
        self.columns.push((name.to_string(), kind));
        self
    }

    /// Declare counter columns returned as integers.
    pub fn counters(mut self, names: &[&str]) -> Self {
        for name in names {
            self.columns.push((name.to_string(), ColumnKind::Integer));
        }
        self
    }
}

/// Execution counters reported by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuerySummary {
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub relationships_created: u64,
    pub relationships_updated: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
}

impl QuerySummary {
    /// Add a counter column value. Unknown columns are ignored.
    pub fn absorb(&mut self, column: &str, value: i64) {
        let value = value.max(0) as u64;
        let slot = match column {
            NODES_CREATED => &mut self.nodes_created,
            NODES_UPDATED => &mut self.nodes_updated,
            RELATIONSHIPS_CREATED => &mut self.relationships_created,
            RELATIONSHIPS_UPDATED => &mut self.relationships_updated,
            PROPERTIES_SET => &mut self.properties_set,
            LABELS_ADDED => &mut self.labels_added,
            LABELS_REMOVED => &mut self.labels_removed,
            _ => return,
        };
        *slot += value;
    }
}

pub type Row = BTreeMap<String, GraphValue>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    pub rows: Vec<Row>,
    pub summary: QuerySummary,
}

impl StatementResult {
    /// Every string found in a list column across all rows.
    pub fn strings(&self, column: &str) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column))
            .flat_map(GraphValue::string_list)
            .collect()
    }
}

/// Quote a validated schema token for literal use in a statement.
pub fn quoted(token: &str) -> String {
    format!("`{}`", token.replace('`', ""))
}
