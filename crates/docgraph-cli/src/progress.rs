//! Progress bar driven by engine state events.

use std::time::Duration;

use docgraph_core::{QueueState, RunState, StateEvent, StateStore, SubscriptionId, SyncItem, Topic};
use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{spinner:.green} {prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Renders the executing item while subscribed to a [`StateStore`].
pub struct ProgressReporter {
    bar: ProgressBar,
    subscription: SubscriptionId,
}

impl ProgressReporter {
    pub fn attach(state: &StateStore) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        let listener = bar.clone();
        let subscription = state.subscribe(Topic::All, move |event| match event {
            StateEvent::Queue(queue) => render_queue(&listener, queue),
            StateEvent::Run(run) => render_run(&listener, run),
        });

        Self { bar, subscription }
    }

    /// Print a line above the bar without tearing it.
    pub fn println(&self, line: impl AsRef<str>) {
        self.bar.println(line);
    }

    pub fn finish(self, state: &StateStore) {
        state.unsubscribe(self.subscription);
        self.bar.finish_and_clear();
    }
}

fn render_queue(bar: &ProgressBar, queue: &QueueState) {
    match &queue.current {
        Some(item) => bar.set_prefix(item_prefix(item, queue.queue.len())),
        None if queue.queue.is_empty() => bar.set_prefix("idle"),
        None => bar.set_prefix(format!("{} queued", queue.queue.len())),
    }
}

fn render_run(bar: &ProgressBar, run: &RunState) {
    let Some(progress) = &run.progress else {
        bar.set_length(0);
        bar.set_position(0);
        bar.set_message("");
        return;
    };
    bar.set_length(progress.total as u64);
    bar.set_position(progress.current as u64);

    let mut message = progress.phase.to_string();
    if let Some(target) = &progress.current_target {
        message.push_str(": ");
        message.push_str(target);
    }
    if run.cancelling {
        message = format!("cancelling ({})", message);
    } else if run.paused {
        message = format!("paused ({})", message);
    }
    bar.set_message(message);
}

fn item_prefix(item: &SyncItem, waiting: usize) -> String {
    let names = item.names.to_vec().join(", ");
    if waiting == 0 {
        format!("{} [{}]", item.kind, names)
    } else {
        format!("{} [{}] +{}", item.kind, names, waiting)
    }
}
