//! The sync engine: queue, single-flight processing loop and run control.
//!
//! One engine owns the state store, the control plane and the collaborators.
//! It is cheap to clone; every clone drives the same queue. Items are
//! processed one at a time on a spawned task, so at most one transaction is
//! open at any moment.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use docgraph_core::{
    CredentialProvider, DocGraphResult, DocumentSource, FrontMatterReader, HistoryEntry, HistoryStore, LinkExtractor,
    NameSet, Progress, ProgressPhase, RunPatch, StateStore, SyncItem, SyncKind, SyncOutcome, SyncSettings,
    SyncStatus,
};
use futures::FutureExt;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{GraphConnector, GraphSession};
use crate::control::ControlPlane;
use crate::error::GraphResult;
use crate::queue;
use crate::schema::initialize_schema;
use crate::sync::{ExecutionContext, sync_labels, sync_node_properties, sync_relationships};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Spawn the processing loop whenever something is enqueued.
    pub auto_process: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { auto_process: true }
    }
}

/// Everything the engine reads from or writes to outside the graph itself.
#[derive(Clone)]
pub struct Collaborators {
    pub documents: Arc<dyn DocumentSource>,
    pub reader: Arc<dyn FrontMatterReader>,
    pub links: Arc<dyn LinkExtractor>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub connector: Arc<dyn GraphConnector>,
    pub history: Arc<dyn HistoryStore>,
}

#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    settings: RwLock<SyncSettings>,
    state: StateStore,
    control: ControlPlane,
    collaborators: Collaborators,
    session: AsyncMutex<Option<Arc<dyn GraphSession>>>,
    running: AtomicBool,
    idle: watch::Sender<bool>,
}

impl SyncEngine {
    pub fn new(settings: SyncSettings, collaborators: Collaborators, config: EngineConfig) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                config,
                settings: RwLock::new(settings),
                state: StateStore::new(),
                control: ControlPlane::new(),
                collaborators,
                session: AsyncMutex::new(None),
                running: AtomicBool::new(false),
                idle,
            }),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.inner.state
    }

    pub fn control(&self) -> &ControlPlane {
        &self.inner.control
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> SyncSettings {
        self.inner.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Edit settings in place. Items already executing keep the snapshot they started with.
    pub fn update_settings<R>(&self, f: impl FnOnce(&mut SyncSettings) -> R) -> R {
        let mut settings = self.inner.settings.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut settings)
    }

    /// Enable a mapping and make sure a running or queued full sync picks it up.
    pub fn enable_mapping(&self, kind: SyncKind, name: &str) -> DocGraphResult<()> {
        self.update_settings(|settings| settings.set_enabled(kind, name, true))?;
        self.add_name_to_active_full_sync(kind, name);
        Ok(())
    }

    pub fn disable_mapping(&self, kind: SyncKind, name: &str) -> DocGraphResult<()> {
        self.update_settings(|settings| settings.set_enabled(kind, name, false))
    }

    /// Queue a sync of one mapping. Returns the id of the item holding it.
    pub fn add_selected_sync(&self, kind: SyncKind, name: &str) -> String {
        let id = self
            .inner
            .state
            .update_queue(|state| queue::merge_selected(state, kind, name));
        debug!(item_id = %id, kind = %kind, name, "Selected sync queued");
        self.trigger();
        id
    }

    /// Queue a full sync of every enabled mapping, one item per kind.
    pub fn add_full_sync(&self) -> Vec<String> {
        let settings = self.settings();
        let ids = self.inner.state.update_queue(|state| {
            SyncKind::ALL
                .iter()
                .filter_map(|kind| queue::merge_full(state, *kind, &settings.enabled_names(*kind)))
                .collect::<Vec<_>>()
        });
        if ids.is_empty() {
            info!("Full sync requested with no enabled mappings");
        } else {
            info!(items = ids.len(), "Full sync queued");
        }
        self.trigger();
        ids
    }

    /// Extend the executing and queued full items of `kind` with `name`.
    pub fn add_name_to_active_full_sync(&self, kind: SyncKind, name: &str) -> bool {
        let changed = self
            .inner
            .state
            .update_queue(|state| queue::extend_active_full(state, kind, name));
        if changed {
            debug!(kind = %kind, name, "Name added to active full sync");
        }
        changed
    }

    pub fn remove_item(&self, id: &str) -> bool {
        self.inner.state.update_queue(|state| queue::remove_item(state, id))
    }

    pub fn pause(&self) {
        self.inner.control.pause();
        self.inner.state.merge_run(RunPatch {
            paused: Some(true),
            ..Default::default()
        });
    }

    pub fn resume(&self) {
        self.inner.control.resume();
        self.inner.state.merge_run(RunPatch {
            paused: Some(false),
            ..Default::default()
        });
    }

    /// Cancel the executing item. Returns `false` if nothing is running.
    pub async fn cancel_current(&self) -> bool {
        match self.inner.control.active_item() {
            Some(item_id) => self.cancel_item(&item_id).await,
            None => false,
        }
    }

    /// Cancel `item_id` if it is still executing. Returns `false` once it has
    /// finished, so a late cancel never lands on the item after it.
    pub async fn cancel_item(&self, item_id: &str) -> bool {
        if self.inner.control.active_item().as_deref() != Some(item_id) {
            return false;
        }
        self.inner.state.merge_run(RunPatch {
            cancelling: Some(true),
            ..Default::default()
        });
        let cancelled = self.inner.control.cancel(item_id).await;
        if !cancelled {
            self.inner.state.merge_run(RunPatch {
                cancelling: Some(false),
                ..Default::default()
            });
        }
        cancelled
    }

    /// Pause now and cancel the executing item once `grace` elapses, unless
    /// undone first. If that item finishes within the window the pause is
    /// lifted instead.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn cancel_with_grace(&self, grace: Duration) -> PendingCancel {
        let target = self.inner.control.active_item();
        self.pause();
        let undo = CancellationToken::new();
        let task = {
            let engine = self.clone();
            let undo = undo.clone();
            let target = target.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = undo.cancelled() => false,
                    _ = tokio::time::sleep(grace) => engine.cancel_target(target.as_deref()).await,
                }
            })
        };
        info!(
            item_id = target.as_deref().unwrap_or("-"),
            grace_ms = grace.as_millis() as u64,
            "Cancel pending"
        );
        PendingCancel {
            engine: self.clone(),
            target,
            undo,
            task,
        }
    }

    async fn cancel_target(&self, target: Option<&str>) -> bool {
        let cancelled = match target {
            Some(item_id) => self.cancel_item(item_id).await,
            None => false,
        };
        if !cancelled {
            debug!("Cancel target already finished; lifting pause");
            self.resume();
        }
        cancelled
    }

    pub async fn history(&self) -> DocGraphResult<Vec<HistoryEntry>> {
        self.inner.collaborators.history.load().await
    }

    pub async fn clear_history(&self) -> DocGraphResult<()> {
        self.inner.collaborators.history.clear().await?;
        info!("Sync history cleared");
        Ok(())
    }

    /// Drop the cached connection; the next item reconnects.
    pub async fn reset_connection(&self) {
        self.inner.session.lock().await.take();
    }

    pub fn is_idle(&self) -> bool {
        !self.inner.running.load(Ordering::Acquire) && self.inner.state.queue().is_idle()
    }

    /// Resolve once the loop has drained the queue.
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        loop {
            if idle.wait_for(|i| *i).await.is_err() {
                return;
            }
            if self.is_idle() {
                return;
            }
            if idle.changed().await.is_err() {
                return;
            }
        }
    }

    fn trigger(&self) {
        if !self.inner.config.auto_process {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime; call process_queue() to drain the queue");
            return;
        };
        self.inner.idle.send_replace(false);
        let engine = self.clone();
        handle.spawn(async move { engine.process_queue().await });
    }

    /// Drain the queue. Concurrent calls return immediately while one is running.
    pub async fn process_queue(&self) {
        let inner = &self.inner;
        loop {
            if inner
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            inner.idle.send_replace(false);

            loop {
                if inner.control.is_paused() && !inner.state.queue().queue.is_empty() {
                    debug!("Paused; holding the next item in the queue");
                    inner.control.wait_for_resume().await;
                }
                // Claim the control plane in the same step that makes the item current.
                let next = inner.state.update_queue(|state| {
                    let item = queue::pop_next(state)?;
                    inner.control.reset(&item.id);
                    Some(item)
                });
                let Some(item) = next else {
                    break;
                };
                self.run_item(item).await;
            }

            inner.state.update_queue(|state| state.current = None);
            inner.running.store(false, Ordering::Release);

            // Something may have been queued after the last pop.
            if inner.state.queue().queue.is_empty() {
                inner.idle.send_replace(true);
                return;
            }
        }
    }

    async fn run_item(&self, mut item: SyncItem) {
        let inner = &self.inner;
        inner.state.merge_run(RunPatch {
            progress: Some(Some(Progress::new(0, 0, ProgressPhase::Preparing))),
            paused: Some(inner.control.is_paused()),
            cancelling: Some(false),
        });
        info!(item_id = %item.id, kind = %item.kind, names = %item.names, "Sync item started");

        let settings = self.settings();
        let names = item.names.clone();
        let result = AssertUnwindSafe(self.execute(&item.id, item.kind, &names, &settings))
            .catch_unwind()
            .await;
        inner.control.release(&item.id);
        inner.control.discard_transaction().await;

        match result {
            Ok(Ok(outcome)) => item.complete(outcome),
            Ok(Err(e)) => {
                error!(item_id = %item.id, error = %e, "Sync item setup failed");
                item.fail(format!("Sync failed: {}", e));
            }
            Err(_) => {
                error!(item_id = %item.id, "Sync executor panicked");
                item.fail("Sync failed: executor panicked");
            }
        }

        let late = inner
            .state
            .queue()
            .current
            .map(|current| current.names.difference(&names))
            .unwrap_or_default();
        item.names = names;

        match item.status {
            SyncStatus::Completed => info!(
                item_id = %item.id,
                summary = item.message.as_deref().unwrap_or_default(),
                "Sync item completed"
            ),
            status => warn!(
                item_id = %item.id,
                status = status.as_str(),
                summary = item.message.as_deref().unwrap_or_default(),
                "Sync item did not complete"
            ),
        }

        if let Err(e) = inner.collaborators.history.record(HistoryEntry::from(item.clone())).await {
            warn!(item_id = %item.id, error = %e, "Failed to record sync history");
        }

        let kind = item.kind;
        let requeue = item.status != SyncStatus::Cancelled && !late.is_empty();
        inner.state.update_queue(|state| {
            state.current = None;
            if requeue {
                for name in late.iter() {
                    queue::merge_selected(state, kind, name);
                }
            }
        });
        if requeue {
            info!(kind = %kind, names = %late, "Names added during the run were queued");
        }
        // A cancel ends the pause. Otherwise the pause carries over to the next item.
        if item.status == SyncStatus::Cancelled {
            inner.control.resume();
        }
        inner.state.merge_run(RunPatch {
            progress: Some(None),
            paused: Some(inner.control.is_paused()),
            cancelling: Some(false),
        });
    }

    async fn execute(
        &self,
        item_id: &str,
        kind: SyncKind,
        names: &NameSet,
        settings: &SyncSettings,
    ) -> GraphResult<SyncOutcome> {
        settings.validate()?;
        let session = self.session(settings).await?;
        let collaborators = &self.inner.collaborators;
        let mut documents = collaborators.documents.documents().await?;
        documents.sort();

        let ctx = ExecutionContext {
            item_id,
            names,
            settings,
            documents: &documents,
            reader: collaborators.reader.as_ref(),
            links: collaborators.links.as_ref(),
            session: session.as_ref(),
            control: &self.inner.control,
            state: &self.inner.state,
        };
        match kind {
            SyncKind::NodeProperty => sync_node_properties(&ctx).await,
            SyncKind::Relationship => sync_relationships(&ctx).await,
            SyncKind::Label => sync_labels(&ctx).await,
        }
    }

    /// Connect on first use and bootstrap the schema once per connection.
    async fn session(&self, settings: &SyncSettings) -> GraphResult<Arc<dyn GraphSession>> {
        let mut cached = self.inner.session.lock().await;
        if let Some(session) = cached.as_ref() {
            return Ok(session.clone());
        }

        let credentials = self.inner.collaborators.credentials.credentials()?;
        let session = self.inner.collaborators.connector.connect(&credentials).await?;
        if let Err(e) = initialize_schema(session.as_ref(), settings).await {
            warn!(error = %e, "Schema initialization failed; continuing without the key constraint");
        }
        *cached = Some(session.clone());
        Ok(session)
    }
}

/// A cancel waiting out its grace period.
pub struct PendingCancel {
    engine: SyncEngine,
    target: Option<String>,
    undo: CancellationToken,
    task: JoinHandle<bool>,
}

impl PendingCancel {
    /// Withdraw the cancel and resume. Returns `true` if the cancel was prevented.
    pub async fn undo(self) -> bool {
        self.undo.cancel();
        let prevented = matches!(self.task.await, Ok(false));
        if prevented {
            self.engine.resume();
            info!("Pending cancel undone");
        }
        prevented
    }

    /// Let the grace period run out. Returns `true` if an item was cancelled.
    pub async fn wait(self) -> bool {
        self.task.await.unwrap_or(false)
    }

    /// Skip the rest of the grace period and cancel immediately.
    pub async fn cancel_now(self) -> bool {
        self.undo.cancel();
        if matches!(self.task.await, Ok(true)) {
            return true;
        }
        self.engine.cancel_target(self.target.as_deref()).await
    }
}
