//! Batched transactional executors, one per sync kind.
//!
//! Every executor follows the same shape: read and convert front matter,
//! open one transaction for the item, apply the rows in batches (pausing and
//! honoring cancellation only between batches), then commit. Row and batch
//! failures are recorded on the outcome; only setup failures are returned
//! as errors.

pub mod label_sync;
pub mod node_sync;
pub mod relationship_sync;

use docgraph_core::{
    DocumentRef, ErrorCategory, FrontMatterReader, LinkExtractor, NameSet, Progress, ProgressPhase, RowError,
    StateStore, SyncOutcome, SyncSettings,
};
use tracing::{debug, info, warn};

use crate::client::GraphSession;
use crate::control::ControlPlane;
use crate::error::GraphResult;
use crate::statement::quoted;

pub use label_sync::sync_labels;
pub use node_sync::sync_node_properties;
pub use relationship_sync::sync_relationships;

/// Marker property used to tell created entities from matched ones.
pub(crate) const CREATED_MARKER: &str = "__docgraph_new";

/// Batch size for a candidate count, unless overridden.
pub fn compute_batch_size(total: usize, override_size: Option<usize>) -> usize {
    if let Some(size) = override_size.filter(|s| *s > 0) {
        return size;
    }
    match total {
        0..=500 => 50,
        501..=2_000 => 100,
        2_001..=10_000 => 250,
        _ => 500,
    }
}

/// Everything an executor needs for one item.
pub struct ExecutionContext<'a> {
    pub item_id: &'a str,
    pub names: &'a NameSet,
    pub settings: &'a SyncSettings,
    pub documents: &'a [DocumentRef],
    pub reader: &'a dyn FrontMatterReader,
    pub links: &'a dyn LinkExtractor,
    pub session: &'a dyn GraphSession,
    pub control: &'a ControlPlane,
    pub state: &'a StateStore,
}

impl ExecutionContext<'_> {
    pub fn batch_size(&self, total: usize) -> usize {
        compute_batch_size(total, self.settings.batch_size)
    }

    pub(crate) fn node_label(&self) -> String {
        quoted(&self.settings.node_label)
    }

    pub(crate) fn key_property(&self) -> String {
        quoted(&self.settings.key_property)
    }

    /// Publish progress and the item's running counters.
    pub fn report(&self, progress: Progress, outcome: &SyncOutcome) {
        self.state.update_run(|run| run.progress = Some(progress));
        self.state.update_queue(|queue| {
            if let Some(current) = queue.current.as_mut().filter(|c| c.id == self.item_id) {
                current.track(outcome);
            }
        });
    }

    /// Open the item's transaction and hand it to the control plane.
    pub async fn open_transaction(&self) -> GraphResult<()> {
        let txn = self.session.begin().await?;
        self.control.hold_transaction(txn).await?;
        debug!(item_id = self.item_id, "Transaction opened");
        Ok(())
    }

    /// Batch boundary: wait out a pause, then report whether to keep going.
    pub async fn checkpoint(&self) -> bool {
        self.control.wait_if_paused().await;
        !self.control.is_cancelled()
    }

    /// Close out a cancelled item: roll back whatever is still held.
    pub async fn cancelled(&self, mut outcome: SyncOutcome) -> SyncOutcome {
        outcome.cancelled = true;
        self.report(
            Progress::new(outcome.successes + outcome.errors, outcome.total, ProgressPhase::RollingBack),
            &outcome,
        );
        self.control.discard_transaction().await;
        info!(
            item_id = self.item_id,
            successes = outcome.successes,
            errors = outcome.errors,
            "Sync item cancelled"
        );
        outcome
    }

    /// Commit the item's transaction, or roll it back if the item was aborted.
    ///
    /// The commit is a batch boundary too: a pause taken during the last batch
    /// holds the item here.
    pub async fn finish(&self, mut outcome: SyncOutcome) -> SyncOutcome {
        if !self.checkpoint().await {
            return self.cancelled(outcome).await;
        }
        let Some(txn) = self.control.take_transaction().await else {
            return self.cancelled(outcome).await;
        };

        if let Some(reason) = outcome.failure.clone() {
            if let Err(e) = txn.rollback().await {
                warn!(item_id = self.item_id, error = %e, "Rollback after aborted transaction failed");
            }
            outcome.revoke_successes(ErrorCategory::Transaction, reason);
            return outcome;
        }

        self.report(
            Progress::new(outcome.successes + outcome.errors, outcome.total, ProgressPhase::Committing),
            &outcome,
        );
        match txn.commit().await {
            Ok(()) => debug!(item_id = self.item_id, "Transaction committed"),
            Err(e) => {
                warn!(item_id = self.item_id, error = %e, "Commit failed");
                outcome.revoke_successes(e.category(), e.to_string());
            }
        }
        outcome
    }
}

/// A unit of work inside a batch.
pub(crate) trait SyncRow {
    fn document(&self) -> &str;
    fn names(&self) -> Vec<&str>;
}

pub(crate) fn succeed_rows<'r, R: SyncRow + 'r>(outcome: &mut SyncOutcome, rows: impl IntoIterator<Item = &'r R>) {
    for row in rows {
        outcome.row_succeeded(row.names());
    }
}

pub(crate) fn fail_rows<'r, R: SyncRow + 'r>(
    outcome: &mut SyncOutcome,
    rows: impl IntoIterator<Item = &'r R>,
    category: ErrorCategory,
    message: &str,
) {
    for row in rows {
        let error = RowError::new(category, message).for_document(row.document());
        let error = match row.names().as_slice() {
            [single] => error.for_name(*single),
            _ => error,
        };
        outcome.row_failed(row.names(), error);
    }
}

/// After a transaction-level failure nothing later can land: fail the rest.
pub(crate) fn abort_remaining<R: SyncRow>(outcome: &mut SyncOutcome, rest: &[R], reason: &str) {
    if !rest.is_empty() {
        warn!(rows = rest.len(), reason, "Transaction unusable; skipping remaining batches");
    }
    fail_rows(
        outcome,
        rest,
        ErrorCategory::Transaction,
        &format!("not applied: {}", reason),
    );
    outcome.failure = Some(reason.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_scales_with_total() {
        assert_eq!(compute_batch_size(0, None), 50);
        assert_eq!(compute_batch_size(500, None), 50);
        assert_eq!(compute_batch_size(501, None), 100);
        assert_eq!(compute_batch_size(5_000, None), 250);
        assert_eq!(compute_batch_size(50_000, None), 500);
    }

    #[test]
    fn test_batch_size_override() {
        assert_eq!(compute_batch_size(50_000, Some(7)), 7);
        assert_eq!(compute_batch_size(10, Some(0)), 50);
    }
}
