//! # Broadcast Hub and Latest-Value Cells
//!
//! The two sharing primitives of the pipeline.
//!
//! - **[`Hub`]**: one producer, many independent consumers. Every subscriber
//!   gets its own copy of each value published after it subscribed; nothing is
//!   replayed. Values are cloned per subscriber, so publish cheap-to-clone
//!   types (`Arc`s). Consumers that only care about the newest value use
//!   [`subscribe`](Hub::subscribe) and may skip values when they fall behind.
//!   Consumers that must see every value in order use
//!   [`subscribe_lossless`](Hub::subscribe_lossless); the hub waits for them,
//!   which backpressures the source.
//! - **[`LatestCell`]**: holds the most recent value of a stream for
//!   latest-value joins. Readers never see a backlog, only "the newest so far",
//!   and `None` until the first value arrives.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::future::ready;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};

use crate::core::lifecycle::{send_or_stop, Lifecycle};

/// # Hub
///
/// Broadcast fan-out over a `tokio::sync::broadcast` channel. Subscribe all
/// consumers first, then [`connect`](Hub::connect) the source; this ordering
/// guarantees no consumer misses the first values.
#[derive(Debug)]
pub struct Hub<T> {
    name: &'static str,
    capacity: usize,
    sender: broadcast::Sender<T>,
    lossless: Vec<mpsc::Sender<T>>,
}

impl<T> Hub<T>
where
    T: Clone + Send + 'static,
{
    /// Creates an unconnected hub. `capacity` bounds how far a slow subscriber
    /// may fall behind before it starts skipping values, or before a lossless
    /// one stalls the source.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { name, capacity, sender, lossless: Vec::new() }
    }

    /// A new consumer handle. Ends when the connected source ends. A consumer
    /// that lags behind by more than the capacity skips the missed values and
    /// logs how many were lost.
    pub fn subscribe(&self) -> BoxStream<'static, T> {
        let name = self.name;
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(move |received| {
                ready(match received {
                    Ok(value) => Some(value),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(hub = name, skipped, "Subscriber lagged, values skipped");
                        None
                    }
                })
            })
            .boxed()
    }

    /// A consumer handle that never skips. Each value is handed to every
    /// lossless subscriber before it is broadcast, so a slow lossless consumer
    /// holds back the source instead of losing values. Dropping the handle
    /// releases the hub.
    pub fn subscribe_lossless(&mut self) -> ReceiverStream<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lossless.push(tx);
        ReceiverStream::new(rx)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count() + self.lossless.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Starts pumping `source` into every subscriber. Consumes the hub so the
    /// subscribers' streams end once the source ends or shutdown begins.
    pub fn connect<S>(self, source: S, lifecycle: &Lifecycle) -> JoinHandle<()>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let cancel = lifecycle.token().clone();
        let Self { name, sender, mut lossless, .. } = self;

        lifecycle.spawn(async move {
            tokio::pin!(source);
            'pump: loop {
                let value = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = source.next() => match next {
                        Some(value) => value,
                        None => break,
                    },
                };

                let mut open = Vec::with_capacity(lossless.len());
                for tx in lossless.drain(..) {
                    if send_or_stop(&tx, value.clone(), &cancel).await {
                        open.push(tx);
                    } else if cancel.is_cancelled() {
                        break 'pump;
                    } else {
                        tracing::debug!(hub = name, "Lossless subscriber dropped");
                    }
                }
                lossless = open;

                // No subscribers is fine: a hot stream simply drops the value.
                if sender.send(value).is_err() {
                    tracing::trace!(hub = name, "Published with no subscribers");
                }
            }
            tracing::debug!(hub = name, "Hub source finished");
        })
    }
}

/// # Latest Cell
///
/// Shared slot holding the most recent value of a stream. Clones share the
/// slot.
#[derive(Debug)]
pub struct LatestCell<T> {
    slot: Arc<RwLock<Option<T>>>,
}

impl<T> Clone for LatestCell<T> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<T> Default for LatestCell<T> {
    fn default() -> Self {
        Self { slot: Arc::new(RwLock::new(None)) }
    }
}

impl<T> LatestCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// An empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held value.
    pub fn set(&self, value: T) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// The newest value, or `None` if nothing has been observed yet.
    pub fn get(&self) -> Option<T> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Keeps the cell updated from `source` until it ends or shutdown begins.
    pub fn follow<S>(&self, source: S, lifecycle: &Lifecycle) -> JoinHandle<()>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let cell = self.clone();
        let cancel = lifecycle.token().clone();
        lifecycle.spawn(async move {
            tokio::pin!(source);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = source.next() => match next {
                        Some(value) => cell.set(value),
                        None => break,
                    },
                }
            }
        })
    }
}
