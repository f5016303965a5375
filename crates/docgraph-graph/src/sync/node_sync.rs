//! Front-matter properties onto document nodes.

use std::collections::BTreeMap;

use docgraph_core::{
    ErrorCategory, GraphValue, ItemStats, PropertyMapping, Progress, ProgressPhase, RowError, SyncKind, SyncOutcome,
    convert_value,
};
use tracing::{debug, info, warn};

use super::{CREATED_MARKER, ExecutionContext, SyncRow, abort_remaining, fail_rows, succeed_rows};
use crate::error::GraphResult;
use crate::statement::{NODES_CREATED, NODES_UPDATED, PROPERTIES_SET, QuerySummary, Statement, quoted};

/// One document's converted values.
struct NodeRow {
    key: String,
    props: BTreeMap<String, GraphValue>,
    names: Vec<String>,
}

impl SyncRow for NodeRow {
    fn document(&self) -> &str {
        &self.key
    }

    fn names(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }
}

/// Upsert the selected property mappings onto every document node.
pub async fn sync_node_properties(ctx: &ExecutionContext<'_>) -> GraphResult<SyncOutcome> {
    let mut outcome = SyncOutcome::new(SyncKind::NodeProperty);
    let mappings = resolve_mappings(ctx, &mut outcome);
    if mappings.is_empty() {
        return Ok(outcome);
    }

    let rows = collect_rows(ctx, &mappings).await;
    outcome.total = rows.len();
    if rows.is_empty() {
        debug!(item_id = ctx.item_id, "No documents carry the selected properties");
        return Ok(outcome);
    }

    ctx.open_transaction().await?;
    let size = ctx.batch_size(rows.len());
    let text = upsert_text(ctx);
    info!(
        item_id = ctx.item_id,
        rows = rows.len(),
        batch_size = size,
        names = %ctx.names,
        "Syncing node properties"
    );

    for (index, batch) in rows.chunks(size).enumerate() {
        if !ctx.checkpoint().await {
            return Ok(ctx.cancelled(outcome).await);
        }

        let statement = Statement::new("upsert_nodes", text.clone())
            .param("rows", batch_param(batch))
            .counters(&[NODES_CREATED, NODES_UPDATED, PROPERTIES_SET]);
        let result = {
            let mut slot = ctx.control.transaction().await;
            match slot.as_deref_mut() {
                Some(txn) => Some(txn.execute(statement).await),
                None => None,
            }
        };
        let Some(result) = result else {
            return Ok(ctx.cancelled(outcome).await);
        };

        match result {
            Ok(result) => {
                add_stats(&mut outcome.stats, &result.summary);
                succeed_rows(&mut outcome, batch);
            }
            Err(e) => {
                warn!(item_id = ctx.item_id, batch = index, error = %e, "Node batch failed");
                fail_rows(&mut outcome, batch, e.category(), &e.to_string());
                if e.category() == ErrorCategory::Transaction {
                    abort_remaining(&mut outcome, &rows[((index + 1) * size).min(rows.len())..], &e.to_string());
                    break;
                }
            }
        }

        let last = batch.last().map(|row| row.key.clone()).unwrap_or_default();
        ctx.report(
            Progress::new((index * size + batch.len()).min(rows.len()), rows.len(), ProgressPhase::Syncing)
                .with_target(last),
            &outcome,
        );
    }

    Ok(ctx.finish(outcome).await)
}

fn resolve_mappings<'a>(ctx: &ExecutionContext<'a>, outcome: &mut SyncOutcome) -> Vec<(String, &'a PropertyMapping)> {
    let mut mappings = Vec::new();
    for name in ctx.names.iter() {
        match ctx.settings.properties.get(name) {
            None => outcome.name_failed(
                name,
                RowError::new(ErrorCategory::Validation, format!("no property mapping named '{}'", name)),
            ),
            Some(mapping) if !mapping.enabled => {
                debug!(name, "Skipping disabled property mapping");
            }
            Some(mapping) if mapping.graph_name(name) == ctx.settings.key_property => outcome.name_failed(
                name,
                RowError::new(
                    ErrorCategory::Validation,
                    format!("'{}' would overwrite the node key property", mapping.graph_name(name)),
                ),
            ),
            Some(mapping) => mappings.push((name.to_string(), mapping)),
        }
    }
    mappings
}

async fn collect_rows(ctx: &ExecutionContext<'_>, mappings: &[(String, &PropertyMapping)]) -> Vec<NodeRow> {
    ctx.report(Progress::new(0, ctx.documents.len(), ProgressPhase::Preparing), &SyncOutcome::new(SyncKind::NodeProperty));

    let mut rows = Vec::new();
    for document in ctx.documents {
        let Some(front_matter) = ctx.reader.read(document).await else {
            continue;
        };

        let mut row = NodeRow {
            key: document.id.clone(),
            props: BTreeMap::new(),
            names: Vec::new(),
        };
        for (name, mapping) in mappings {
            let Some(raw) = front_matter.get(name) else {
                continue;
            };
            match convert_value(raw, mapping.value_type) {
                Some(value) => {
                    row.props.insert(mapping.graph_name(name).to_string(), value);
                    row.names.push(name.clone());
                }
                None => debug!(
                    document = %document.id,
                    name = %name,
                    value_type = mapping.value_type.as_str(),
                    "Dropping value that does not convert"
                ),
            }
        }
        // Nothing survived conversion: the document is skipped like one without the property.
        if !row.props.is_empty() {
            rows.push(row);
        }
    }
    rows
}

fn upsert_text(ctx: &ExecutionContext<'_>) -> String {
    let marker = quoted(CREATED_MARKER);
    format!(
        "UNWIND $rows AS row \
         MERGE (n:{label} {{{key}: row.key}}) \
         ON CREATE SET n.{marker} = true \
         SET n += row.props \
         REMOVE n.placeholder \
         WITH n, row, coalesce(n.{marker}, false) AS created \
         REMOVE n.{marker} \
         RETURN count(CASE WHEN created THEN 1 END) AS {created_col}, \
         count(CASE WHEN NOT created THEN 1 END) AS {updated_col}, \
         coalesce(sum(size(keys(row.props))), 0) AS {props_col}",
        label = ctx.node_label(),
        key = ctx.key_property(),
        marker = marker,
        created_col = NODES_CREATED,
        updated_col = NODES_UPDATED,
        props_col = PROPERTIES_SET,
    )
}

fn batch_param(batch: &[NodeRow]) -> Vec<GraphValue> {
    batch
        .iter()
        .map(|row| {
            let mut entry = BTreeMap::new();
            entry.insert("key".to_string(), GraphValue::from(row.key.as_str()));
            entry.insert("props".to_string(), GraphValue::Map(row.props.clone()));
            GraphValue::Map(entry)
        })
        .collect()
}

fn add_stats(stats: &mut ItemStats, summary: &QuerySummary) {
    if let ItemStats::NodeProperty {
        nodes_created,
        nodes_updated,
        properties_set,
    } = stats
    {
        *nodes_created += summary.nodes_created;
        *nodes_updated += summary.nodes_updated;
        *properties_set += summary.properties_set;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::testing::{FakeGraph, Harness, TEST_ITEM};
    use docgraph_core::{InMemoryDocuments, NameSet, PropertyType, SyncSettings};
    use serde_json::json;
    use std::time::Duration;

    fn settings(names: &[(&str, PropertyType)]) -> SyncSettings {
        let mut settings = SyncSettings::default();
        for (name, ty) in names {
            settings.properties.insert(name.to_string(), PropertyMapping::new(*ty));
        }
        settings
    }

    fn touches(statement: &Statement, key: &str) -> bool {
        match statement.params.get("rows") {
            Some(GraphValue::List(rows)) => rows.iter().any(|row| match row {
                GraphValue::Map(map) => map.get("key").and_then(GraphValue::as_str) == Some(key),
                _ => false,
            }),
            _ => false,
        }
    }

    #[tokio::test]
    async fn test_skips_documents_without_value_and_coerces_to_string() {
        let docs = InMemoryDocuments::new()
            .with("a", json!({ "title": "no status" }))
            .with("b", json!({ "Status": "done" }))
            .with("c", json!({ "Status": 123 }));
        let harness = Harness::new(FakeGraph::new(), docs, settings(&[("Status", PropertyType::String)])).await;
        let names = NameSet::single("Status");

        let outcome = sync_node_properties(&harness.context(&names)).await.unwrap();

        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.successes, 2);
        assert_eq!(outcome.errors, 0);
        assert!(outcome.is_success());
        assert!(harness.graph.node("a").is_none());
        assert_eq!(harness.graph.node("b").unwrap().props["Status"], GraphValue::from("done"));
        assert_eq!(harness.graph.node("c").unwrap().props["Status"], GraphValue::from("123"));
        assert_eq!(harness.graph.commits(), 1);
        assert_eq!(
            outcome.stats,
            ItemStats::NodeProperty {
                nodes_created: 2,
                nodes_updated: 0,
                properties_set: 2
            }
        );
    }

    #[tokio::test]
    async fn test_boolean_and_integer_coercion() {
        let docs = InMemoryDocuments::new()
            .with("a", json!({ "Published": "TRUE", "Count": "abc" }))
            .with("b", json!({ "Published": "false", "Count": "7" }));
        let harness = Harness::new(
            FakeGraph::new(),
            docs,
            settings(&[("Published", PropertyType::Boolean), ("Count", PropertyType::Integer)]),
        )
        .await;
        let names: NameSet = ["Published", "Count"].into_iter().collect();

        let outcome = sync_node_properties(&harness.context(&names)).await.unwrap();

        assert_eq!(outcome.successes, 2);
        let a = harness.graph.node("a").unwrap();
        assert_eq!(a.props["Published"], GraphValue::Boolean(true));
        assert!(!a.props.contains_key("Count"));
        let b = harness.graph.node("b").unwrap();
        assert_eq!(b.props["Published"], GraphValue::Boolean(false));
        assert_eq!(b.props["Count"], GraphValue::Integer(7));
        assert_eq!(outcome.name_counts["Count"].successes, 1);
        assert_eq!(outcome.name_counts["Published"].successes, 2);
    }

    #[tokio::test]
    async fn test_document_with_only_unconvertible_values_is_skipped() {
        let docs = InMemoryDocuments::new()
            .with("a", json!({ "Count": "abc" }))
            .with("b", json!({ "Count": "7" }));
        let harness = Harness::new(FakeGraph::new(), docs, settings(&[("Count", PropertyType::Integer)])).await;
        let names = NameSet::single("Count");

        let outcome = sync_node_properties(&harness.context(&names)).await.unwrap();

        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.successes, 1);
        assert_eq!(outcome.errors, 0);
        assert_eq!(outcome.name_counts["Count"].successes, 1);
        assert!(harness.graph.node("a").is_none());
        assert_eq!(harness.graph.node("b").unwrap().props["Count"], GraphValue::Integer(7));
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_others() {
        let docs = InMemoryDocuments::new()
            .with("a", json!({ "Status": "x" }))
            .with("b", json!({ "Status": "y" }))
            .with("c", json!({ "Status": "z" }));
        let mut config = settings(&[("Status", PropertyType::String)]);
        config.batch_size = Some(1);
        let graph = FakeGraph::new();
        graph.fail_when(|s| touches(s, "b").then(|| GraphError::query("Type mismatch: expected Map")));
        let harness = Harness::new(graph, docs, config).await;
        let names = NameSet::single("Status");

        let outcome = sync_node_properties(&harness.context(&names)).await.unwrap();

        assert_eq!(outcome.successes, 2);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.row_errors[0].category, ErrorCategory::InvalidType);
        assert_eq!(outcome.row_errors[0].document.as_deref(), Some("b"));
        assert!(harness.graph.node("a").is_some());
        assert!(harness.graph.node("b").is_none());
        assert!(harness.graph.node("c").is_some());
        assert_eq!(harness.graph.commits(), 1);
    }

    #[tokio::test]
    async fn test_transaction_failure_stops_batching_and_rolls_back() {
        let docs = InMemoryDocuments::new()
            .with("a", json!({ "Status": "x" }))
            .with("b", json!({ "Status": "y" }))
            .with("c", json!({ "Status": "z" }));
        let mut config = settings(&[("Status", PropertyType::String)]);
        config.batch_size = Some(1);
        let graph = FakeGraph::new();
        graph.fail_when(|s| touches(s, "b").then(|| GraphError::Transaction("terminated".into())));
        let harness = Harness::new(graph, docs, config).await;
        let names = NameSet::single("Status");

        let outcome = sync_node_properties(&harness.context(&names)).await.unwrap();

        assert_eq!(outcome.successes, 0);
        assert_eq!(outcome.errors, 3);
        assert!(outcome.failure.is_some());
        assert_eq!(harness.graph.operations(), vec!["upsert_nodes", "upsert_nodes"]);
        assert_eq!(harness.graph.commits(), 0);
        assert_eq!(harness.graph.rollbacks(), 1);
        assert_eq!(harness.graph.node_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_revokes_successes() {
        let docs = InMemoryDocuments::new()
            .with("a", json!({ "Status": "x" }))
            .with("b", json!({ "Status": "y" }));
        let graph = FakeGraph::new();
        graph.fail_commit("connection reset");
        let harness = Harness::new(graph, docs, settings(&[("Status", PropertyType::String)])).await;
        let names = NameSet::single("Status");

        let outcome = sync_node_properties(&harness.context(&names)).await.unwrap();

        assert_eq!(outcome.successes, 0);
        assert_eq!(outcome.errors, 2);
        assert_eq!(outcome.name_counts["Status"].errors, 2);
        assert_eq!(outcome.row_errors.last().unwrap().category, ErrorCategory::Transaction);
        assert!(outcome.failure.is_some());
        assert_eq!(harness.graph.node_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_mapping_is_validation_error_without_transaction() {
        let docs = InMemoryDocuments::new().with("a", json!({ "Status": "x" }));
        let harness = Harness::new(FakeGraph::new(), docs, SyncSettings::default()).await;
        let names = NameSet::single("Status");

        let outcome = sync_node_properties(&harness.context(&names)).await.unwrap();

        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.row_errors[0].category, ErrorCategory::Validation);
        assert_eq!(harness.graph.begins(), 0);
    }

    #[tokio::test]
    async fn test_cancel_waits_for_running_batch_then_rolls_back() {
        let docs = InMemoryDocuments::new()
            .with("a", json!({ "Status": "x" }))
            .with("b", json!({ "Status": "y" }))
            .with("c", json!({ "Status": "z" }));
        let mut config = settings(&[("Status", PropertyType::String)]);
        config.batch_size = Some(1);
        let graph = FakeGraph::new();
        let gate = graph.hold("upsert_nodes");
        let harness = Harness::new(graph, docs, config).await;
        let names = NameSet::single("Status");
        let ctx = harness.context(&names);

        let (outcome, _) = tokio::join!(sync_node_properties(&ctx), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tokio::join!(harness.control.cancel(TEST_ITEM), async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                gate.add_permits(10);
            })
        });
        let outcome = outcome.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.successes, 1);
        assert_eq!(harness.graph.operations().len(), 1);
        assert_eq!(harness.graph.rollbacks(), 1);
        assert_eq!(harness.graph.commits(), 0);
        assert_eq!(harness.graph.node_count(), 0);
    }
}
