//! Labels on document nodes whose front matter matches a label mapping.

use std::collections::{BTreeMap, BTreeSet};

use docgraph_core::{
    ErrorCategory, ItemStats, LabelMapping, Progress, ProgressPhase, RowError, SyncKind, SyncOutcome,
    validate::validate_identifier,
};
use tracing::{debug, info, warn};

use super::{ExecutionContext, SyncRow, abort_remaining, fail_rows, succeed_rows};
use crate::client::GraphTransaction;
use crate::error::GraphResult;
use crate::statement::{ColumnKind, LABELS_ADDED, LABELS_REMOVED, Statement, quoted};

/// One (document, label) match.
struct LabelRow {
    key: String,
    label: String,
}

impl SyncRow for LabelRow {
    fn document(&self) -> &str {
        &self.key
    }

    fn names(&self) -> Vec<&str> {
        vec![self.label.as_str()]
    }
}

/// Apply the selected labels, then strip them from nodes that no longer match.
pub async fn sync_labels(ctx: &ExecutionContext<'_>) -> GraphResult<SyncOutcome> {
    let mut outcome = SyncOutcome::new(SyncKind::Label);
    let mappings = resolve_mappings(ctx, &mut outcome);
    if mappings.is_empty() {
        return Ok(outcome);
    }

    let rows = collect_rows(ctx, &mappings).await;
    outcome.total = rows.len();

    // Removal still runs with no matches, so a transaction is always needed here.
    ctx.open_transaction().await?;
    let size = ctx.batch_size(rows.len());
    info!(
        item_id = ctx.item_id,
        rows = rows.len(),
        batch_size = size,
        names = %ctx.names,
        "Syncing labels"
    );

    for (index, batch) in rows.chunks(size).enumerate() {
        if !ctx.checkpoint().await {
            return Ok(ctx.cancelled(outcome).await);
        }

        let fatal = {
            let mut slot = ctx.control.transaction().await;
            match slot.as_deref_mut() {
                Some(txn) => Some(apply_batch(ctx, txn, batch, &mut outcome).await),
                None => None,
            }
        };
        let Some(fatal) = fatal else {
            return Ok(ctx.cancelled(outcome).await);
        };
        if let Some(reason) = fatal {
            abort_remaining(&mut outcome, &rows[((index + 1) * size).min(rows.len())..], &reason);
            break;
        }

        let last = batch.last().map(|row| row.key.clone()).unwrap_or_default();
        ctx.report(
            Progress::new((index * size + batch.len()).min(rows.len()), rows.len(), ProgressPhase::Syncing)
                .with_target(last),
            &outcome,
        );
    }

    if outcome.failure.is_none() {
        if !ctx.checkpoint().await {
            return Ok(ctx.cancelled(outcome).await);
        }
        let removed = {
            let mut slot = ctx.control.transaction().await;
            match slot.as_deref_mut() {
                Some(txn) => Some(remove_stale(ctx, txn, &mappings, &rows, &mut outcome).await),
                None => None,
            }
        };
        match removed {
            None => return Ok(ctx.cancelled(outcome).await),
            Some(Some(reason)) => outcome.failure = Some(reason),
            Some(None) => {}
        }
    }

    Ok(ctx.finish(outcome).await)
}

/// Apply one batch, one statement per label. Returns the reason if the transaction broke.
async fn apply_batch(
    ctx: &ExecutionContext<'_>,
    txn: &mut dyn GraphTransaction,
    batch: &[LabelRow],
    outcome: &mut SyncOutcome,
) -> Option<String> {
    let mut groups: BTreeMap<&str, Vec<&LabelRow>> = BTreeMap::new();
    for row in batch {
        groups.entry(row.label.as_str()).or_default().push(row);
    }

    let mut fatal = None;
    for (label, group) in groups {
        if let Some(reason) = &fatal {
            fail_rows(outcome, group, ErrorCategory::Transaction, &format!("not applied: {}", reason));
            continue;
        }
        let keys: Vec<String> = group.iter().map(|row| row.key.clone()).collect();
        match txn.execute(apply_label(ctx, label, keys)).await {
            Ok(result) => {
                add_applied(&mut outcome.stats, result.summary.labels_added);
                let labelled: BTreeSet<String> = result.strings("keys").into_iter().collect();
                for row in group {
                    if labelled.contains(&row.key) {
                        succeed_rows(outcome, [row]);
                    } else {
                        fail_rows(
                            outcome,
                            [row],
                            ErrorCategory::SourceMissing,
                            &format!("node '{}' does not exist", row.key),
                        );
                    }
                }
            }
            Err(e) => {
                warn!(label, error = %e, "Label group failed");
                fail_rows(outcome, group, e.category(), &e.to_string());
                if e.category() == ErrorCategory::Transaction {
                    fatal = Some(e.to_string());
                }
            }
        }
    }
    fatal
}

/// Strip each label from nodes outside its candidate set.
async fn remove_stale(
    ctx: &ExecutionContext<'_>,
    txn: &mut dyn GraphTransaction,
    mappings: &[(String, &LabelMapping)],
    rows: &[LabelRow],
    outcome: &mut SyncOutcome,
) -> Option<String> {
    ctx.state.update_run(|run| {
        run.progress = Some(Progress::new(rows.len(), rows.len(), ProgressPhase::RemovingStale))
    });
    for (label, _) in mappings {
        let keep: Vec<String> = rows
            .iter()
            .filter(|row| &row.label == label)
            .map(|row| row.key.clone())
            .collect();
        match txn.execute(remove_label(ctx, label, keep)).await {
            Ok(result) => {
                debug!(label = %label, removed = result.summary.labels_removed, "Stale labels removed");
                add_removed(&mut outcome.stats, result.summary.labels_removed);
            }
            Err(e) => {
                warn!(label = %label, error = %e, "Removing stale labels failed");
                outcome.name_failed(label, RowError::new(e.category(), format!("removing stale labels: {}", e)));
                if e.category() == ErrorCategory::Transaction {
                    return Some(e.to_string());
                }
            }
        }
    }
    None
}

fn resolve_mappings<'a>(ctx: &ExecutionContext<'a>, outcome: &mut SyncOutcome) -> Vec<(String, &'a LabelMapping)> {
    let mut mappings = Vec::new();
    for name in ctx.names.iter() {
        match ctx.settings.labels.get(name) {
            None => outcome.name_failed(
                name,
                RowError::new(ErrorCategory::Validation, format!("no label mapping named '{}'", name)),
            ),
            Some(mapping) if !mapping.enabled => {
                debug!(name, "Skipping disabled label mapping");
            }
            Some(mapping) => match validate_identifier("label", name) {
                Ok(()) => mappings.push((name.to_string(), mapping)),
                Err(e) => outcome.name_failed(name, RowError::new(ErrorCategory::Validation, e.to_string())),
            },
        }
    }
    mappings
}

async fn collect_rows(ctx: &ExecutionContext<'_>, mappings: &[(String, &LabelMapping)]) -> Vec<LabelRow> {
    ctx.report(Progress::new(0, ctx.documents.len(), ProgressPhase::Preparing), &SyncOutcome::new(SyncKind::Label));

    let mut rows = Vec::new();
    for document in ctx.documents {
        let Some(front_matter) = ctx.reader.read(document).await else {
            continue;
        };
        for (label, mapping) in mappings {
            if front_matter.get(&mapping.property).is_some_and(|raw| mapping.matches(raw)) {
                rows.push(LabelRow {
                    key: document.id.clone(),
                    label: label.clone(),
                });
            }
        }
    }
    rows
}

fn apply_label(ctx: &ExecutionContext<'_>, label: &str, keys: Vec<String>) -> Statement {
    let text = format!(
        "UNWIND $keys AS key \
         MATCH (n:{node} {{{key}: key}}) \
         WITH n, n:{label} AS had \
         SET n:{label} \
         RETURN collect(n.{key}) AS keys, count(CASE WHEN NOT had THEN 1 END) AS {added_col}",
        node = ctx.node_label(),
        key = ctx.key_property(),
        label = quoted(label),
        added_col = LABELS_ADDED,
    );
    Statement::new("apply_labels", text)
        .param("keys", keys)
        .column("keys", ColumnKind::StringList)
        .counters(&[LABELS_ADDED])
}

fn remove_label(ctx: &ExecutionContext<'_>, label: &str, keep: Vec<String>) -> Statement {
    let text = format!(
        "MATCH (n:{node}:{label}) \
         WHERE NOT n.{key} IN $keys \
         REMOVE n:{label} \
         RETURN count(n) AS {removed_col}",
        node = ctx.node_label(),
        key = ctx.key_property(),
        label = quoted(label),
        removed_col = LABELS_REMOVED,
    );
    Statement::new("remove_stale_labels", text)
        .param("keys", keep)
        .counters(&[LABELS_REMOVED])
}

fn add_applied(stats: &mut ItemStats, added: u64) {
    if let ItemStats::Label { labels_applied, .. } = stats {
        *labels_applied += added;
    }
}

fn add_removed(stats: &mut ItemStats, removed: u64) {
    if let ItemStats::Label { labels_removed, .. } = stats {
        *labels_removed += removed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGraph, Harness};
    use docgraph_core::{InMemoryDocuments, NameSet, SyncSettings};
    use serde_json::json;

    fn settings() -> SyncSettings {
        let mut settings = SyncSettings::default();
        settings.labels.insert("DONE".into(), LabelMapping::new("status", Some("done")));
        settings
    }

    #[tokio::test]
    async fn test_applies_and_removes_stale_labels() {
        let docs = InMemoryDocuments::new()
            .with("a", json!({ "status": "Done" }))
            .with("b", json!({ "status": "open" }))
            .with("c", json!({ "status": "done" }));
        let graph = FakeGraph::new().with_node("a").with_node("b").with_node("c");
        let harness = Harness::new(graph, docs, settings()).await;
        let names = NameSet::single("DONE");

        // b used to be done
        let mut seed = harness.graph.begin_fake();
        seed.execute(apply_label(&harness.context(&names), "DONE", vec!["b".into()]))
            .await
            .unwrap();
        seed.commit().await.unwrap();

        let outcome = sync_labels(&harness.context(&names)).await.unwrap();

        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.successes, 2);
        assert!(harness.graph.node("a").unwrap().labels.contains("DONE"));
        assert!(harness.graph.node("c").unwrap().labels.contains("DONE"));
        assert!(!harness.graph.node("b").unwrap().labels.contains("DONE"));
        assert_eq!(
            outcome.stats,
            ItemStats::Label {
                labels_applied: 2,
                labels_removed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_missing_node_is_source_missing() {
        let docs = InMemoryDocuments::new()
            .with("a", json!({ "status": "done" }))
            .with("gone", json!({ "status": "done" }));
        let graph = FakeGraph::new().with_node("a");
        let harness = Harness::new(graph, docs, settings()).await;
        let names = NameSet::single("DONE");

        let outcome = sync_labels(&harness.context(&names)).await.unwrap();

        assert_eq!(outcome.successes, 1);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.row_errors[0].category, ErrorCategory::SourceMissing);
        assert_eq!(outcome.row_errors[0].document.as_deref(), Some("gone"));
    }

    #[tokio::test]
    async fn test_invalid_label_rejected_before_transaction() {
        let mut config = settings();
        config.labels.insert("in-progress".into(), LabelMapping::new("status", Some("wip")));
        let docs = InMemoryDocuments::new().with("a", json!({ "status": "wip" }));
        let harness = Harness::new(FakeGraph::new().with_node("a"), docs, config).await;
        let names = NameSet::single("in-progress");

        let outcome = sync_labels(&harness.context(&names)).await.unwrap();

        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.row_errors[0].category, ErrorCategory::Validation);
        assert_eq!(harness.graph.begins(), 0);
    }

    #[tokio::test]
    async fn test_no_matches_still_removes_label() {
        let docs = InMemoryDocuments::new().with("a", json!({ "status": "open" }));
        let graph = FakeGraph::new().with_node("a");
        let harness = Harness::new(graph, docs, settings()).await;
        let names = NameSet::single("DONE");

        let outcome = sync_labels(&harness.context(&names)).await.unwrap();

        assert_eq!(outcome.total, 0);
        assert_eq!(harness.graph.operations(), vec!["remove_stale_labels"]);
        assert_eq!(harness.graph.commits(), 1);
    }
}
