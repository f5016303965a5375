//! Subscribable state shared by the queue, the executors and any UI.
//!
//! Two slices are kept: the queue (queued items plus the current one) and the
//! run state (live progress and pause/cancel flags). Subscribers are called
//! synchronously after every mutation, outside the store lock, so a listener
//! may read the store again. Subscribing replays the current snapshot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::item::model::SyncItem;
use crate::item::progress::Progress;

/// Which slice a subscriber listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Queue,
    Run,
    All,
}

#[derive(Debug, Clone, Default)]
pub struct QueueState {
    pub queue: Vec<SyncItem>,
    pub current: Option<SyncItem>,
}

impl QueueState {
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.current.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub progress: Option<Progress>,
    pub paused: bool,
    pub cancelling: bool,
}

/// Shallow partial update of [`QueueState`]; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct QueuePatch {
    pub queue: Option<Vec<SyncItem>>,
    pub current: Option<Option<SyncItem>>,
}

/// Shallow partial update of [`RunState`]; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub progress: Option<Option<Progress>>,
    pub paused: Option<bool>,
    pub cancelling: Option<bool>,
}

#[derive(Debug, Clone)]
pub enum StateEvent {
    Queue(QueueState),
    Run(RunState),
}

impl StateEvent {
    fn topic(&self) -> Topic {
        match self {
            Self::Queue(_) => Topic::Queue,
            Self::Run(_) => Topic::Run,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&StateEvent) + Send + Sync>;

#[derive(Default)]
struct Inner {
    queue: QueueState,
    run: RunState,
    listeners: Vec<(SubscriptionId, Topic, Listener)>,
    next_id: u64,
}

#[derive(Default)]
pub struct StateStore {
    inner: Mutex<Inner>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener and replay the current snapshot to it.
    pub fn subscribe<F>(&self, topic: Topic, listener: F) -> SubscriptionId
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let (id, replay) = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let id = SubscriptionId(inner.next_id);
            inner.listeners.push((id, topic, listener.clone()));
            let replay = match topic {
                Topic::Queue => vec![StateEvent::Queue(inner.queue.clone())],
                Topic::Run => vec![StateEvent::Run(inner.run.clone())],
                Topic::All => vec![
                    StateEvent::Queue(inner.queue.clone()),
                    StateEvent::Run(inner.run.clone()),
                ],
            };
            (id, replay)
        };
        for event in &replay {
            listener(event);
        }
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(sid, _, _)| *sid != id);
        inner.listeners.len() != before
    }

    pub fn queue(&self) -> QueueState {
        self.lock().queue.clone()
    }

    pub fn run(&self) -> RunState {
        self.lock().run.clone()
    }

    pub fn merge_queue(&self, patch: QueuePatch) {
        self.update_queue(|state| {
            if let Some(queue) = patch.queue {
                state.queue = queue;
            }
            if let Some(current) = patch.current {
                state.current = current;
            }
        });
    }

    pub fn merge_run(&self, patch: RunPatch) {
        self.update_run(|state| {
            if let Some(progress) = patch.progress {
                state.progress = progress;
            }
            if let Some(paused) = patch.paused {
                state.paused = paused;
            }
            if let Some(cancelling) = patch.cancelling {
                state.cancelling = cancelling;
            }
        });
    }

    /// Mutate the queue slice atomically and notify subscribers.
    pub fn update_queue<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let (result, event, listeners) = {
            let mut inner = self.lock();
            let result = f(&mut inner.queue);
            let event = StateEvent::Queue(inner.queue.clone());
            let listeners = matching(&inner, &event);
            (result, event, listeners)
        };
        notify(&listeners, &event);
        result
    }

    /// Mutate the run slice atomically and notify subscribers.
    pub fn update_run<R>(&self, f: impl FnOnce(&mut RunState) -> R) -> R {
        let (result, event, listeners) = {
            let mut inner = self.lock();
            let result = f(&mut inner.run);
            let event = StateEvent::Run(inner.run.clone());
            let listeners = matching(&inner, &event);
            (result, event, listeners)
        };
        notify(&listeners, &event);
        result
    }
}

fn matching(inner: &Inner, event: &StateEvent) -> Vec<Listener> {
    let topic = event.topic();
    inner
        .listeners
        .iter()
        .filter(|(_, t, _)| *t == Topic::All || *t == topic)
        .map(|(_, _, l)| l.clone())
        .collect()
}

fn notify(listeners: &[Listener], event: &StateEvent) {
    for listener in listeners {
        listener(event);
    }
}
