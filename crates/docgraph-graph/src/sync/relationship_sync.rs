//! Front-matter links onto relationships between document nodes.
//!
//! Each batch runs three steps in the item's transaction: ensure a node exists
//! for every link target (creating placeholders), verify the source nodes, then
//! merge the relationships grouped by type and direction. A failure in one step
//! or group only affects the rows that depend on it.

use std::collections::{BTreeMap, BTreeSet};

use docgraph_core::{
    Direction, ErrorCategory, GraphValue, ItemStats, Progress, ProgressPhase, RelationshipMapping, RowError, SyncKind,
    SyncOutcome, validate::validate_identifier,
};
use tracing::{debug, info, warn};

use super::{CREATED_MARKER, ExecutionContext, SyncRow, abort_remaining, fail_rows, succeed_rows};
use crate::client::GraphTransaction;
use crate::error::{GraphError, GraphResult};
use crate::statement::{ColumnKind, NODES_CREATED, RELATIONSHIPS_CREATED, RELATIONSHIPS_UPDATED, Statement, quoted};

/// One (document, mapping, target) link.
struct LinkRow {
    source: String,
    name: String,
    target: String,
    rel_type: String,
    direction: Direction,
}

impl SyncRow for LinkRow {
    fn document(&self) -> &str {
        &self.source
    }

    fn names(&self) -> Vec<&str> {
        vec![self.name.as_str()]
    }
}

/// What happened to each row of a batch.
#[derive(Default)]
struct BatchReport {
    /// Rows merged successfully, by index into the batch.
    linked: BTreeSet<usize>,
    /// Failed rows with their error.
    failed: BTreeMap<usize, (ErrorCategory, String)>,
    /// Set when the transaction itself failed.
    fatal: Option<String>,
}

impl BatchReport {
    fn fail(&mut self, indices: impl IntoIterator<Item = usize>, category: ErrorCategory, message: &str) {
        for index in indices {
            self.failed.entry(index).or_insert((category, message.to_string()));
        }
    }

    fn note_fatal(&mut self, error: &GraphError) {
        if error.category() == ErrorCategory::Transaction && self.fatal.is_none() {
            self.fatal = Some(error.to_string());
        }
    }
}

/// Merge relationships for the selected link mappings.
pub async fn sync_relationships(ctx: &ExecutionContext<'_>) -> GraphResult<SyncOutcome> {
    let mut outcome = SyncOutcome::new(SyncKind::Relationship);
    let mappings = resolve_mappings(ctx, &mut outcome);
    if mappings.is_empty() {
        return Ok(outcome);
    }

    let rows = collect_rows(ctx, &mappings).await;
    outcome.total = rows.len();
    if rows.is_empty() {
        debug!(item_id = ctx.item_id, "No documents carry the selected links");
        return Ok(outcome);
    }

    ctx.open_transaction().await?;
    let size = ctx.batch_size(rows.len());
    info!(
        item_id = ctx.item_id,
        rows = rows.len(),
        batch_size = size,
        names = %ctx.names,
        "Syncing relationships"
    );

    for (index, batch) in rows.chunks(size).enumerate() {
        if !ctx.checkpoint().await {
            return Ok(ctx.cancelled(outcome).await);
        }

        let report = {
            let mut slot = ctx.control.transaction().await;
            match slot.as_deref_mut() {
                Some(txn) => Some(apply_batch(ctx, txn, batch, &mut outcome.stats).await),
                None => None,
            }
        };
        let Some(report) = report else {
            return Ok(ctx.cancelled(outcome).await);
        };

        for (row_index, row) in batch.iter().enumerate() {
            if let Some((category, message)) = report.failed.get(&row_index) {
                fail_rows(&mut outcome, [row], *category, message);
            } else if report.linked.contains(&row_index) {
                succeed_rows(&mut outcome, [row]);
            }
        }

        if let Some(reason) = report.fatal {
            warn!(item_id = ctx.item_id, batch = index, reason = %reason, "Relationship batch broke the transaction");
            abort_remaining(&mut outcome, &rows[((index + 1) * size).min(rows.len())..], &reason);
            break;
        }

        let last = batch.last().map(|row| row.source.clone()).unwrap_or_default();
        ctx.report(
            Progress::new((index * size + batch.len()).min(rows.len()), rows.len(), ProgressPhase::Linking)
                .with_target(last),
            &outcome,
        );
    }

    Ok(ctx.finish(outcome).await)
}

async fn apply_batch(
    ctx: &ExecutionContext<'_>,
    txn: &mut dyn GraphTransaction,
    batch: &[LinkRow],
    stats: &mut ItemStats,
) -> BatchReport {
    let mut report = BatchReport::default();
    let all = 0..batch.len();
    let progress = |phase| Progress::new(0, batch.len(), phase);

    // (a) placeholder targets
    ctx.state.update_run(|run| run.progress = Some(progress(ProgressPhase::EnsuringTargets)));
    let targets: BTreeSet<&str> = batch.iter().map(|row| row.target.as_str()).collect();
    let ensured = match txn.execute(ensure_targets(ctx, &targets)).await {
        Ok(result) => {
            add_placeholders(stats, result.summary.nodes_created);
            result.strings("keys").into_iter().collect::<BTreeSet<_>>()
        }
        Err(e) => {
            debug!(error = %e, "Ensuring targets failed");
            report.note_fatal(&e);
            report.fail(all, ErrorCategory::TargetFailure, &format!("could not ensure target nodes: {}", e));
            return report;
        }
    };
    let missing_targets: Vec<usize> = all
        .clone()
        .filter(|i| !ensured.contains(&batch[*i].target))
        .collect();
    report.fail(missing_targets, ErrorCategory::TargetFailure, "target node was not created");

    // (b) source nodes
    ctx.state.update_run(|run| run.progress = Some(progress(ProgressPhase::VerifyingSources)));
    let sources: BTreeSet<&str> = batch.iter().map(|row| row.source.as_str()).collect();
    let existing = match txn.execute(verify_sources(ctx, &sources)).await {
        Ok(result) => result.strings("keys").into_iter().collect::<BTreeSet<_>>(),
        Err(e) => {
            debug!(error = %e, "Verifying sources failed");
            report.note_fatal(&e);
            report.fail(all, ErrorCategory::SourceMissing, &format!("could not verify source nodes: {}", e));
            return report;
        }
    };
    for i in all.clone() {
        if !existing.contains(&batch[i].source) {
            let message = format!("source node '{}' does not exist", batch[i].source);
            report.fail([i], ErrorCategory::SourceMissing, &message);
        }
    }

    // (c) one merge per (type, direction)
    ctx.state.update_run(|run| run.progress = Some(progress(ProgressPhase::Linking)));
    let mut groups: BTreeMap<(&str, Direction), Vec<usize>> = BTreeMap::new();
    for i in all.filter(|i| !report.failed.contains_key(i)) {
        groups
            .entry((batch[i].rel_type.as_str(), batch[i].direction))
            .or_default()
            .push(i);
    }
    for ((rel_type, direction), indices) in groups {
        if report.fatal.is_some() {
            report.fail(indices, ErrorCategory::Transaction, "not applied: transaction failed");
            continue;
        }
        let pairs = indices.iter().map(|i| pair(&batch[*i])).collect::<Vec<_>>();
        match txn.execute(merge_relationships(ctx, rel_type, direction, pairs)).await {
            Ok(result) => {
                add_links(stats, result.summary.relationships_created, result.summary.relationships_updated);
                report.linked.extend(indices);
            }
            Err(e) => {
                warn!(rel_type, error = %e, "Relationship group failed");
                report.note_fatal(&e);
                report.fail(indices, e.category(), &e.to_string());
            }
        }
    }
    report
}

fn resolve_mappings<'a>(
    ctx: &ExecutionContext<'a>,
    outcome: &mut SyncOutcome,
) -> Vec<(String, &'a RelationshipMapping)> {
    let mut mappings = Vec::new();
    for name in ctx.names.iter() {
        match ctx.settings.relationships.get(name) {
            None => outcome.name_failed(
                name,
                RowError::new(ErrorCategory::Validation, format!("no relationship mapping named '{}'", name)),
            ),
            Some(mapping) if !mapping.enabled => {
                debug!(name, "Skipping disabled relationship mapping");
            }
            Some(mapping) => match validate_identifier("relationship type", &mapping.relationship_type) {
                Ok(()) => mappings.push((name.to_string(), mapping)),
                Err(e) => outcome.name_failed(name, RowError::new(ErrorCategory::Validation, e.to_string())),
            },
        }
    }
    mappings
}

async fn collect_rows(ctx: &ExecutionContext<'_>, mappings: &[(String, &RelationshipMapping)]) -> Vec<LinkRow> {
    ctx.report(
        Progress::new(0, ctx.documents.len(), ProgressPhase::Preparing),
        &SyncOutcome::new(SyncKind::Relationship),
    );

    let mut rows = Vec::new();
    for document in ctx.documents {
        let Some(front_matter) = ctx.reader.read(document).await else {
            continue;
        };
        for (name, mapping) in mappings {
            let Some(raw) = front_matter.get(name) else {
                continue;
            };
            let mut seen = BTreeSet::new();
            for target in ctx.links.extract(raw) {
                let target = target.trim().to_string();
                if target.is_empty() || !seen.insert(target.clone()) {
                    continue;
                }
                rows.push(LinkRow {
                    source: document.id.clone(),
                    name: name.clone(),
                    target,
                    rel_type: mapping.relationship_type.clone(),
                    direction: mapping.direction,
                });
            }
        }
    }
    rows
}

fn string_list(keys: &BTreeSet<&str>) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

fn ensure_targets(ctx: &ExecutionContext<'_>, targets: &BTreeSet<&str>) -> Statement {
    let marker = quoted(CREATED_MARKER);
    let text = format!(
        "UNWIND $keys AS key \
         MERGE (t:{label} {{{key}: key}}) \
         ON CREATE SET t.placeholder = true, t.{marker} = true \
         WITH t, coalesce(t.{marker}, false) AS created \
         REMOVE t.{marker} \
         RETURN collect(t.{key}) AS keys, count(CASE WHEN created THEN 1 END) AS {created_col}",
        label = ctx.node_label(),
        key = ctx.key_property(),
        marker = marker,
        created_col = NODES_CREATED,
    );
    Statement::new("ensure_targets", text)
        .param("keys", string_list(targets))
        .column("keys", ColumnKind::StringList)
        .counters(&[NODES_CREATED])
}

fn verify_sources(ctx: &ExecutionContext<'_>, sources: &BTreeSet<&str>) -> Statement {
    let text = format!(
        "UNWIND $keys AS key \
         MATCH (s:{label} {{{key}: key}}) \
         RETURN collect(s.{key}) AS keys",
        label = ctx.node_label(),
        key = ctx.key_property(),
    );
    Statement::new("verify_sources", text)
        .param("keys", string_list(sources))
        .column("keys", ColumnKind::StringList)
}

fn merge_relationships(
    ctx: &ExecutionContext<'_>,
    rel_type: &str,
    direction: Direction,
    pairs: Vec<GraphValue>,
) -> Statement {
    let pattern = match direction {
        Direction::Outgoing => format!("(s)-[r:{}]->(t)", quoted(rel_type)),
        Direction::Incoming => format!("(s)<-[r:{}]-(t)", quoted(rel_type)),
    };
    let marker = quoted(CREATED_MARKER);
    let text = format!(
        "UNWIND $pairs AS pair \
         MATCH (s:{label} {{{key}: pair.source}}) \
         MATCH (t:{label} {{{key}: pair.target}}) \
         MERGE {pattern} \
         ON CREATE SET r.{marker} = true \
         WITH r, coalesce(r.{marker}, false) AS created \
         REMOVE r.{marker} \
         RETURN count(CASE WHEN created THEN 1 END) AS {created_col}, \
         count(CASE WHEN NOT created THEN 1 END) AS {updated_col}",
        label = ctx.node_label(),
        key = ctx.key_property(),
        pattern = pattern,
        marker = marker,
        created_col = RELATIONSHIPS_CREATED,
        updated_col = RELATIONSHIPS_UPDATED,
    );
    Statement::new("merge_relationships", text)
        .param("pairs", pairs)
        .counters(&[RELATIONSHIPS_CREATED, RELATIONSHIPS_UPDATED])
}

fn pair(row: &LinkRow) -> GraphValue {
    let mut entry = BTreeMap::new();
    entry.insert("source".to_string(), GraphValue::from(row.source.as_str()));
    entry.insert("target".to_string(), GraphValue::from(row.target.as_str()));
    GraphValue::Map(entry)
}

fn add_placeholders(stats: &mut ItemStats, created: u64) {
    if let ItemStats::Relationship {
        placeholder_nodes_created,
        ..
    } = stats
    {
        *placeholder_nodes_created += created;
    }
}

fn add_links(stats: &mut ItemStats, created: u64, updated: u64) {
    if let ItemStats::Relationship {
        relationships_created,
        relationships_updated,
        ..
    } = stats
    {
        *relationships_created += created;
        *relationships_updated += updated;
    }
}
