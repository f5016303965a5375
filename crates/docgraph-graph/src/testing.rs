//! In-memory graph double for tests.
//!
//! Statements are interpreted by their `operation` name rather than by parsing
//! Cypher; the few literal tokens (relationship type, label) are read back out
//! of the statement text. Writes go to a per-transaction working copy that
//! replaces the committed graph on commit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use docgraph_core::{
    Credentials, DocumentRef, DocumentSource, GraphValue, InMemoryDocuments, LinkExtractor, NameSet, StateStore,
    SyncSettings,
};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::client::{GraphConnector, GraphSession, GraphTransaction};
use crate::control::ControlPlane;
use crate::error::{GraphError, GraphResult};
use crate::statement::{QuerySummary, Row, Statement, StatementResult};
use crate::sync::ExecutionContext;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FakeNode {
    pub props: BTreeMap<String, GraphValue>,
    pub labels: BTreeSet<String>,
    pub placeholder: bool,
}

#[derive(Debug, Clone, Default)]
struct GraphData {
    nodes: BTreeMap<String, FakeNode>,
    /// (source, type, target) after resolving direction.
    relationships: BTreeSet<(String, String, String)>,
}

type Failure = Box<dyn Fn(&Statement) -> Option<GraphError> + Send + Sync>;

#[derive(Default)]
struct FakeState {
    committed: GraphData,
    executed: Vec<Statement>,
    commits: usize,
    rollbacks: usize,
    begins: usize,
    failures: Vec<Failure>,
    commit_error: Option<String>,
    connect_error: Option<String>,
    hold: Option<(&'static str, Arc<Semaphore>)>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeGraph {
    state: Arc<Mutex<FakeState>>,
}

impl FakeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Seed a committed node.
    pub fn with_node(self, key: &str) -> Self {
        self.lock().committed.nodes.insert(key.to_string(), FakeNode::default());
        self
    }

    /// Fail every statement the predicate picks.
    pub fn fail_when(&self, f: impl Fn(&Statement) -> Option<GraphError> + Send + Sync + 'static) {
        self.lock().failures.push(Box::new(f));
    }

    pub fn fail_commit(&self, msg: &str) {
        self.lock().commit_error = Some(msg.to_string());
    }

    pub fn fail_connect(&self, msg: &str) {
        self.lock().connect_error = Some(msg.to_string());
    }

    /// Block statements of `operation` until permits are added to the returned semaphore.
    pub fn hold(&self, operation: &'static str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.lock().hold = Some((operation, gate.clone()));
        gate
    }

    pub fn begin_fake(&self) -> Box<dyn GraphTransaction> {
        let mut state = self.lock();
        state.begins += 1;
        Box::new(FakeTransaction {
            graph: self.clone(),
            working: state.committed.clone(),
        })
    }

    pub fn connector(&self) -> Arc<dyn GraphConnector> {
        Arc::new(FakeConnector { graph: self.clone() })
    }

    pub fn node(&self, key: &str) -> Option<FakeNode> {
        self.lock().committed.nodes.get(key).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.lock().committed.nodes.len()
    }

    pub fn has_relationship(&self, source: &str, rel_type: &str, target: &str) -> bool {
        self.lock()
            .committed
            .relationships
            .contains(&(source.to_string(), rel_type.to_string(), target.to_string()))
    }

    pub fn relationship_count(&self) -> usize {
        self.lock().committed.relationships.len()
    }

    pub fn operations(&self) -> Vec<&'static str> {
        self.lock().executed.iter().map(|s| s.operation).collect()
    }

    pub fn executed(&self) -> Vec<Statement> {
        self.lock().executed.clone()
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    pub fn begins(&self) -> usize {
        self.lock().begins
    }
}

struct FakeConnector {
    graph: FakeGraph,
}

#[async_trait]
impl GraphConnector for FakeConnector {
    async fn connect(&self, _credentials: &Credentials) -> GraphResult<Arc<dyn GraphSession>> {
        if let Some(msg) = self.graph.lock().connect_error.clone() {
            return Err(GraphError::Connection(msg));
        }
        Ok(Arc::new(FakeSession { graph: self.graph.clone() }))
    }
}

struct FakeSession {
    graph: FakeGraph,
}

#[async_trait]
impl GraphSession for FakeSession {
    async fn run(&self, statement: Statement) -> GraphResult<StatementResult> {
        self.graph.lock().executed.push(statement);
        Ok(StatementResult::default())
    }

    async fn begin(&self) -> GraphResult<Box<dyn GraphTransaction>> {
        Ok(self.graph.begin_fake())
    }
}

struct FakeTransaction {
    graph: FakeGraph,
    working: GraphData,
}

#[async_trait]
impl GraphTransaction for FakeTransaction {
    async fn execute(&mut self, statement: Statement) -> GraphResult<StatementResult> {
        let gate = {
            let state = self.graph.lock();
            state
                .hold
                .as_ref()
                .filter(|(op, _)| *op == statement.operation)
                .map(|(_, gate)| gate.clone())
        };
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let mut state = self.graph.lock();
        state.executed.push(statement.clone());
        if let Some(err) = state.failures.iter().find_map(|f| f(&statement)) {
            return Err(err);
        }
        drop(state);
        Ok(apply(&mut self.working, &statement))
    }

    async fn commit(self: Box<Self>) -> GraphResult<()> {
        let mut state = self.graph.lock();
        if let Some(msg) = state.commit_error.clone() {
            return Err(GraphError::Transaction(msg));
        }
        state.committed = self.working;
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> GraphResult<()> {
        self.graph.lock().rollbacks += 1;
        Ok(())
    }
}

/// Link values are plain document ids, or lists of them.
pub(crate) struct PlainLinks;

impl LinkExtractor for PlainLinks {
    fn extract(&self, raw: &Value) -> Vec<String> {
        match raw {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => Vec::new(),
        }
    }
}

/// Item id the harness runs its executors under.
pub(crate) const TEST_ITEM: &str = "test-item";

/// Everything an executor needs, wired to a fake graph.
pub(crate) struct Harness {
    pub graph: FakeGraph,
    pub docs: InMemoryDocuments,
    pub settings: SyncSettings,
    pub control: ControlPlane,
    pub state: StateStore,
    session: Arc<dyn GraphSession>,
    documents: Vec<DocumentRef>,
}

impl Harness {
    pub async fn new(graph: FakeGraph, docs: InMemoryDocuments, settings: SyncSettings) -> Self {
        let session = graph
            .connector()
            .connect(&Credentials::new("neo4j", "secret"))
            .await
            .unwrap();
        let documents = docs.documents().await.unwrap();
        let control = ControlPlane::new();
        control.reset(TEST_ITEM);
        Self {
            graph,
            docs,
            settings,
            control,
            state: StateStore::new(),
            session,
            documents,
        }
    }

    pub fn context<'a>(&'a self, names: &'a NameSet) -> ExecutionContext<'a> {
        ExecutionContext {
            item_id: TEST_ITEM,
            names,
            settings: &self.settings,
            documents: &self.documents,
            reader: &self.docs,
            links: &PlainLinks,
            session: self.session.as_ref(),
            control: &self.control,
            state: &self.state,
        }
    }
}

fn param_list<'a>(statement: &'a Statement, key: &str) -> &'a [GraphValue] {
    match statement.params.get(key) {
        Some(GraphValue::List(items)) => items,
        _ => &[],
    }
}

fn field<'a>(value: &'a GraphValue, key: &str) -> Option<&'a GraphValue> {
    match value {
        GraphValue::Map(map) => map.get(key),
        _ => None,
    }
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    Some(&text[from..from + len])
}

fn single_row(entries: Vec<(&str, GraphValue)>, summary: QuerySummary) -> StatementResult {
    let row: Row = entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    StatementResult { rows: vec![row], summary }
}

fn apply(data: &mut GraphData, statement: &Statement) -> StatementResult {
    let mut summary = QuerySummary::default();
    match statement.operation {
        "upsert_nodes" => {
            for row in param_list(statement, "rows") {
                let Some(key) = field(row, "key").and_then(GraphValue::as_str) else { continue };
                let created = !data.nodes.contains_key(key);
                let node = data.nodes.entry(key.to_string()).or_default();
                if let Some(GraphValue::Map(props)) = field(row, "props") {
                    summary.properties_set += props.len() as u64;
                    node.props.extend(props.clone());
                }
                if created {
                    summary.nodes_created += 1;
                } else {
                    summary.nodes_updated += 1;
                }
            }
            single_row(vec![], summary)
        }
        "ensure_targets" => {
            let mut keys = Vec::new();
            for key in param_list(statement, "keys").iter().filter_map(GraphValue::as_str) {
                if !data.nodes.contains_key(key) {
                    data.nodes.insert(
                        key.to_string(),
                        FakeNode {
                            placeholder: true,
                            ..Default::default()
                        },
                    );
                    summary.nodes_created += 1;
                }
                keys.push(key.to_string());
            }
            single_row(vec![("keys", GraphValue::from(keys))], summary)
        }
        "verify_sources" => {
            let keys: Vec<String> = param_list(statement, "keys")
                .iter()
                .filter_map(GraphValue::as_str)
                .filter(|key| data.nodes.contains_key(*key))
                .map(str::to_string)
                .collect();
            single_row(vec![("keys", GraphValue::from(keys))], summary)
        }
        "merge_relationships" => {
            let rel_type = between(&statement.text, "[r:`", "`]").unwrap_or_default().to_string();
            let outgoing = statement.text.contains("]->");
            for pair in param_list(statement, "pairs") {
                let (Some(source), Some(target)) = (
                    field(pair, "source").and_then(GraphValue::as_str),
                    field(pair, "target").and_then(GraphValue::as_str),
                ) else {
                    continue;
                };
                if !data.nodes.contains_key(source) || !data.nodes.contains_key(target) {
                    continue;
                }
                let edge = if outgoing {
                    (source.to_string(), rel_type.clone(), target.to_string())
                } else {
                    (target.to_string(), rel_type.clone(), source.to_string())
                };
                if data.relationships.insert(edge) {
                    summary.relationships_created += 1;
                } else {
                    summary.relationships_updated += 1;
                }
            }
            single_row(vec![], summary)
        }
        "apply_labels" => {
            let label = between(&statement.text, "SET n:`", "`").unwrap_or_default().to_string();
            let mut keys = Vec::new();
            for key in param_list(statement, "keys").iter().filter_map(GraphValue::as_str) {
                if let Some(node) = data.nodes.get_mut(key) {
                    if node.labels.insert(label.clone()) {
                        summary.labels_added += 1;
                    }
                    keys.push(key.to_string());
                }
            }
            single_row(vec![("keys", GraphValue::from(keys))], summary)
        }
        "remove_stale_labels" => {
            let label = between(&statement.text, "REMOVE n:`", "`").unwrap_or_default().to_string();
            let keep: BTreeSet<&str> = param_list(statement, "keys").iter().filter_map(GraphValue::as_str).collect();
            for (key, node) in data.nodes.iter_mut() {
                if !keep.contains(key.as_str()) && node.labels.remove(&label) {
                    summary.labels_removed += 1;
                }
            }
            single_row(vec![], summary)
        }
        _ => StatementResult::default(),
    }
}
