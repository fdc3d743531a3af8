//! # Snapshot Poller
//!
//! A self-scheduling fetch loop for sources without a push interface.
//!
//! ## Core Design Principles:
//! - **Immediate start**: the first fetch runs as soon as the poller starts,
//!   then on a fixed timer.
//! - **No overlap**: a tick that fires while a fetch is in flight is dropped,
//!   never queued. A slow source is simply polled less often.
//! - **Only changes**: a snapshot equal to the previously emitted one is not
//!   republished. The last emitted snapshot belongs to the [`Poller`] and its
//!   clones, so it survives a restart after an error.
//! - **Fail fast**: a fetch error is emitted and ends the stream. Restarting is
//!   left to [`retry_forever`](crate::core::retry::retry_forever), which keeps
//!   the retry policy in one place.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::lifecycle::{send_or_stop, Lifecycle};
use crate::core::CHANNEL_CAPACITY;

/// # Snapshot Source
///
/// Anything that can produce a full snapshot on demand: the catalog endpoint,
/// the chat update feed, a fake in tests.
pub trait SnapshotSource: Send + Sync + 'static {
    /// What one fetch returns.
    type Snapshot: Clone + PartialEq + Send + Sync + 'static;
    /// Why a fetch failed.
    type Error: Display + Send + 'static;

    /// Fetches the current snapshot.
    fn fetch(&self) -> impl Future<Output = Result<Self::Snapshot, Self::Error>> + Send;
}

type FetchResult<S> = Result<<S as SnapshotSource>::Snapshot, <S as SnapshotSource>::Error>;

/// Periodic driver for one [`SnapshotSource`].
pub struct Poller<S: SnapshotSource> {
    name: &'static str,
    source: Arc<S>,
    interval: Duration,
    last: Arc<Mutex<Option<S::Snapshot>>>,
}

impl<S: SnapshotSource> Clone for Poller<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            source: Arc::clone(&self.source),
            interval: self.interval,
            last: Arc::clone(&self.last),
        }
    }
}

impl<S: SnapshotSource> Poller<S> {
    /// A poller fetching from `source` every `interval`.
    pub fn new(name: &'static str, source: Arc<S>, interval: Duration) -> Self {
        Self { name, source, interval, last: Arc::new(Mutex::new(None)) }
    }

    /// Records `snapshot` as the newest emitted one. `false` if it equals the
    /// previous snapshot.
    fn remember(&self, snapshot: &S::Snapshot) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(snapshot) {
            return false;
        }
        *last = Some(snapshot.clone());
        true
    }

    /// Starts polling. The stream yields distinct snapshots and ends after the
    /// first error, on shutdown, or when the consumer drops it.
    pub fn poll(&self, lifecycle: &Lifecycle) -> ReceiverStream<FetchResult<S>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = lifecycle.token().clone();
        let poller = self.clone();
        let (name, interval) = (self.name, self.interval);

        lifecycle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut in_flight: Option<BoxFuture<'static, FetchResult<S>>> = None;
            let mut dropped_ticks: u64 = 0;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        if in_flight.is_some() {
                            dropped_ticks += 1;
                            tracing::debug!(poller = name, dropped_ticks, "Fetch still running, tick dropped");
                            continue;
                        }
                        let source = Arc::clone(&poller.source);
                        in_flight = Some(async move { source.fetch().await }.boxed());
                    }
                    result = async {
                        match in_flight.as_mut() {
                            Some(fetch) => fetch.await,
                            None => std::future::pending().await,
                        }
                    }, if in_flight.is_some() => {
                        in_flight = None;
                        match result {
                            Ok(snapshot) if !poller.remember(&snapshot) => {
                                tracing::trace!(poller = name, "Snapshot unchanged");
                            }
                            Ok(snapshot) => {
                                if !send_or_stop(&tx, Ok(snapshot), &cancel).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(poller = name, error = %e, "Fetch failed");
                                send_or_stop(&tx, Err(e), &cancel).await;
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!(poller = name, "Poller stopped");
        });

        ReceiverStream::new(rx)
    }
}
