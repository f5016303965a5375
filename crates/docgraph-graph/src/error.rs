//! Graph and engine error types.

use docgraph_core::{DocGraphError, ErrorCategory};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Neo4j connection failed: {0}")]
    Connection(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Failed to read column '{column}': {message}")]
    Decode { column: String, message: String },

    #[error("A transaction is already open")]
    TransactionBusy,

    #[error(transparent)]
    Core(#[from] DocGraphError),
}

pub type GraphResult<T> = Result<T, GraphError>;

impl GraphError {
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Map a failure onto the row-error taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection(_) => ErrorCategory::Network,
            Self::Transaction(_) | Self::TransactionBusy => ErrorCategory::Transaction,
            Self::Decode { .. } => ErrorCategory::InvalidType,
            Self::Query(msg) => categorize_message(msg),
            Self::Core(DocGraphError::ValidationError(_)) => ErrorCategory::Validation,
            Self::Core(_) => ErrorCategory::Unknown,
        }
    }
}

/// Driver errors arrive as text; classify them by what they mention.
fn categorize_message(msg: &str) -> ErrorCategory {
    let lower = msg.to_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if mentions(&["connection", "broken pipe", "timed out", "timeout", "io error", "unreachable"]) {
        ErrorCategory::Network
    } else if mentions(&["transaction", "deadlock", "terminated"]) {
        ErrorCategory::Transaction
    } else if mentions(&["type mismatch", "typeerror", "cannot be converted", "invalid type"]) {
        ErrorCategory::InvalidType
    } else if mentions(&["syntax", "statement", "query", "constraint", "semantic"]) {
        ErrorCategory::QueryExecution
    } else {
        ErrorCategory::Unknown
    }
}
