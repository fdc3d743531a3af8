//! # Stage Lifecycle
//!
//! Every pipeline stage runs as its own tokio task. A [`Lifecycle`] bundles the
//! shared cancellation token with a task tracker so shutdown can cancel all
//! stages and then wait until each one has finished its cleanup (notably the
//! accumulators' final flush).

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancellation and task tracking shared by all stages of one pipeline.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Lifecycle {
    /// A fresh, running lifecycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires when shutdown begins.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether shutdown has begun.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawns a tracked task.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Cancels every stage and waits for all tracked tasks to return.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Sends `value` downstream unless shutdown begins first. Returns `false` when
/// the stage should stop, either because of cancellation or because the
/// receiver is gone.
pub async fn send_or_stop<T>(tx: &mpsc::Sender<T>, value: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(value) => sent.is_ok(),
    }
}
