//! Neo4j connection client and the session contract the engine consumes.

use std::sync::Arc;

use async_trait::async_trait;
use docgraph_core::{Credentials, GraphValue};
use neo4rs::{BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query, Txn};
use serde::Deserialize;
use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::statement::{ColumnKind, Row, Statement, StatementResult};

/// Configuration for connecting to Neo4j. Credentials are supplied separately.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub database: String,
    pub max_connections: usize,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            database: "neo4j".to_string(),
            max_connections: 4,
            fetch_size: 200,
        }
    }
}

/// Opens sessions with a set of credentials.
#[async_trait]
pub trait GraphConnector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> GraphResult<Arc<dyn GraphSession>>;
}

/// A live connection able to run auto-commit statements and open transactions.
#[async_trait]
pub trait GraphSession: Send + Sync {
    async fn run(&self, statement: Statement) -> GraphResult<StatementResult>;
    async fn begin(&self) -> GraphResult<Box<dyn GraphTransaction>>;
}

/// An explicit transaction. Dropping it without commit abandons its writes.
#[async_trait]
pub trait GraphTransaction: Send {
    async fn execute(&mut self, statement: Statement) -> GraphResult<StatementResult>;
    async fn commit(self: Box<Self>) -> GraphResult<()>;
    async fn rollback(self: Box<Self>) -> GraphResult<()>;
}

/// Connector backed by the `neo4rs` driver.
#[derive(Debug, Clone, Default)]
pub struct Neo4jConnector {
    config: GraphConfig,
}

impl Neo4jConnector {
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl GraphConnector for Neo4jConnector {
    async fn connect(&self, credentials: &Credentials) -> GraphResult<Arc<dyn GraphSession>> {
        let client = GraphClient::connect(&self.config, credentials).await?;
        Ok(Arc::new(client))
    }
}

/// Client for Neo4j graph operations.
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Create a new GraphClient from config.
    ///
    /// `Graph::connect` only builds the pool, so a `RETURN 1` ping forces the
    /// bolt handshake and surfaces bad credentials or an unreachable server here.
    pub async fn connect(config: &GraphConfig, credentials: &Credentials) -> GraphResult<Self> {
        let neo4j_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&credentials.principal)
            .password(&credentials.secret)
            .db(config.database.as_str())
            .max_connections(config.max_connections)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(format!("invalid Neo4j config: {}", e)))?;

        let graph = Graph::connect(neo4j_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .map_err(|e| GraphError::Connection(format!("Neo4j is not responding: {}", e)))?;

        debug!(uri = %config.uri, database = %config.database, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

#[async_trait]
impl GraphSession for GraphClient {
    async fn run(&self, statement: Statement) -> GraphResult<StatementResult> {
        let columns = statement.columns.clone();
        let mut stream = self
            .graph
            .execute(to_query(&statement))
            .await
            .map_err(|e| GraphError::query(e.to_string()))?;

        let mut result = StatementResult::default();
        while let Some(row) = stream.next().await.map_err(|e| GraphError::query(e.to_string()))? {
            push_row(&mut result, &row, &columns)?;
        }
        Ok(result)
    }

    async fn begin(&self) -> GraphResult<Box<dyn GraphTransaction>> {
        let txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| GraphError::Transaction(e.to_string()))?;
        Ok(Box::new(Neo4jTransaction { txn }))
    }
}

struct Neo4jTransaction {
    txn: Txn,
}

#[async_trait]
impl GraphTransaction for Neo4jTransaction {
    async fn execute(&mut self, statement: Statement) -> GraphResult<StatementResult> {
        let columns = statement.columns.clone();
        let mut stream = self
            .txn
            .execute(to_query(&statement))
            .await
            .map_err(|e| GraphError::query(e.to_string()))?;

        let mut result = StatementResult::default();
        while let Some(row) = stream
            .next(self.txn.handle())
            .await
            .map_err(|e| GraphError::query(e.to_string()))?
        {
            push_row(&mut result, &row, &columns)?;
        }
        Ok(result)
    }

    async fn commit(self: Box<Self>) -> GraphResult<()> {
        self.txn
            .commit()
            .await
            .map_err(|e| GraphError::Transaction(format!("commit failed: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> GraphResult<()> {
        self.txn
            .rollback()
            .await
            .map_err(|e| GraphError::Transaction(format!("rollback failed: {}", e)))
    }
}

fn to_query(statement: &Statement) -> Query {
    statement
        .params
        .iter()
        .fold(Query::new(statement.text.clone()), |query, (key, value)| {
            query.param(key, to_bolt(value))
        })
}

fn push_row(result: &mut StatementResult, row: &neo4rs::Row, columns: &[(String, ColumnKind)]) -> GraphResult<()> {
    let mut decoded = Row::new();
    for (name, kind) in columns {
        let decode_err = |e: neo4rs::DeError| GraphError::Decode {
            column: name.clone(),
            message: format!("{:?}", e),
        };
        let value = match kind {
            ColumnKind::Integer => {
                let n: i64 = row.get(name).map_err(decode_err)?;
                result.summary.absorb(name, n);
                GraphValue::Integer(n)
            }
            ColumnKind::StringList => {
                let items: Vec<String> = row.get(name).map_err(decode_err)?;
                GraphValue::from(items)
            }
        };
        decoded.insert(name.clone(), value);
    }
    result.rows.push(decoded);
    Ok(())
}

fn to_bolt(value: &GraphValue) -> BoltType {
    match value {
        GraphValue::Null => BoltType::Null(BoltNull),
        GraphValue::Boolean(b) => BoltType::from(*b),
        GraphValue::Integer(i) => BoltType::from(*i),
        GraphValue::Float(f) => BoltType::from(*f),
        GraphValue::String(s) => BoltType::from(s.clone()),
        GraphValue::Date(d) => BoltType::from(*d),
        GraphValue::DateTime(dt) => BoltType::from(*dt),
        GraphValue::List(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(to_bolt(item));
            }
            BoltType::List(list)
        }
        GraphValue::Map(entries) => {
            let mut map = BoltMap::new();
            for (key, item) in entries {
                map.put(BoltString::from(key.as_str()), to_bolt(item));
            }
            BoltType::Map(map)
        }
    }
}
