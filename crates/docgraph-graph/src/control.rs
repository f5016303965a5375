//! Pause/cancel signaling and the slot holding the open transaction.
//!
//! The executor keeps the transaction slot locked while a batch runs, so an
//! external cancel waits for the batch in flight and then rolls back. While
//! paused the slot is free and a cancel rolls back straight away.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::GraphTransaction;
use crate::error::{GraphError, GraphResult};

type TransactionSlot = Option<Box<dyn GraphTransaction>>;

/// The item currently allowed to run and the token that cancels it.
#[derive(Default)]
struct ActiveItem {
    item_id: Option<String>,
    token: CancellationToken,
}

pub struct ControlPlane {
    paused: watch::Sender<bool>,
    active: Mutex<ActiveItem>,
    transaction: AsyncMutex<TransactionSlot>,
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPlane {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused,
            active: Mutex::new(ActiveItem::default()),
            transaction: AsyncMutex::new(None),
        }
    }

    fn active_guard(&self) -> MutexGuard<'_, ActiveItem> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand the control plane to `item_id` with a fresh cancellation token.
    ///
    /// A pause is left in place: it holds until resumed or until a cancel lands.
    pub fn reset(&self, item_id: &str) {
        *self.active_guard() = ActiveItem {
            item_id: Some(item_id.to_string()),
            token: CancellationToken::new(),
        };
    }

    pub fn active_item(&self) -> Option<String> {
        self.active_guard().item_id.clone()
    }

    /// The item's executor has returned; later cancels for it are ignored.
    pub fn release(&self, item_id: &str) {
        let mut active = self.active_guard();
        if active.item_id.as_deref() == Some(item_id) {
            active.item_id = None;
        }
    }

    pub fn pause(&self) {
        if !self.paused.send_replace(true) {
            info!("Sync paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.send_replace(false) {
            info!("Sync resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.active_guard().token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.active_guard().token.clone()
    }

    /// Suspend until resumed. Returns early when the item is cancelled.
    pub async fn wait_if_paused(&self) {
        let token = self.cancellation_token();
        let mut paused = self.paused.subscribe();
        if !*paused.borrow_and_update() {
            return;
        }
        debug!("Waiting for resume at batch boundary");
        let resumed = async move {
            let _ = paused.wait_for(|p| !*p).await;
        };
        tokio::select! {
            _ = resumed => {}
            _ = token.cancelled() => {}
        }
    }

    /// Suspend until resumed. Between items there is nothing to cancel.
    pub async fn wait_for_resume(&self) {
        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|p| !*p).await;
    }

    /// Store the item's transaction. Only one may be open at a time.
    pub async fn hold_transaction(&self, txn: Box<dyn GraphTransaction>) -> GraphResult<()> {
        let mut slot = self.transaction.lock().await;
        if slot.is_some() {
            // Abandon the newcomer; the held transaction stays authoritative.
            drop(txn);
            return Err(GraphError::TransactionBusy);
        }
        *slot = Some(txn);
        Ok(())
    }

    /// Lock the transaction slot for one batch.
    pub async fn transaction(&self) -> AsyncMutexGuard<'_, TransactionSlot> {
        self.transaction.lock().await
    }

    pub async fn take_transaction(&self) -> TransactionSlot {
        self.transaction.lock().await.take()
    }

    pub async fn has_transaction(&self) -> bool {
        self.transaction.lock().await.is_some()
    }

    /// Cancel `item_id` and roll back its transaction.
    ///
    /// Returns `false` without touching anything when `item_id` is no longer
    /// the active item.
    pub async fn cancel(&self, item_id: &str) -> bool {
        {
            let active = self.active_guard();
            if active.item_id.as_deref() != Some(item_id) {
                debug!(item_id, "Cancel ignored; item is not active");
                return false;
            }
            active.token.cancel();
        }
        let Some(txn) = self.take_transaction().await else {
            debug!(item_id, "Cancel requested with no open transaction");
            return true;
        };
        match txn.rollback().await {
            Ok(()) => info!(item_id, "Transaction rolled back on cancel"),
            Err(e) => warn!(item_id, error = %e, "Rollback on cancel failed"),
        }
        true
    }

    /// Roll back whatever transaction is still held. Used after an item ends.
    pub async fn discard_transaction(&self) {
        if let Some(txn) = self.take_transaction().await {
            if let Err(e) = txn.rollback().await {
                warn!(error = %e, "Rollback of abandoned transaction failed");
            }
        }
    }
}
