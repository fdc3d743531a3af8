//! # Persistent Accumulator
//!
//! A durable fold over an event stream. Every piece of state that must survive
//! a restart (the processed-key set, the subscription set) is one of these.
//!
//! ## Core Design Principles:
//! - **Load once**: the prior value is read from the store exactly once, before
//!   the first event is folded. Anything unreadable means "start from the
//!   default".
//! - **Fold in order**: events are applied one at a time in arrival order. The
//!   fold decides per event what, if anything, to emit downstream.
//! - **Flush on a cadence**: a separate flusher task samples the latest value on
//!   a fixed timer and persists it if it was folded into since the last
//!   successful write. There is only ever one write in flight; ticks missed
//!   during a slow write are skipped.
//! - **Final flush**: when the source ends, the consumer goes away, or shutdown
//!   begins, the flusher is stopped and awaited and one last write is attempted.
//!   The output stream closes only after that write returns.
//! - **Write failures are not fatal**: they are logged and the next tick tries
//!   again with the then-latest value.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::core::lifecycle::{send_or_stop, Lifecycle};
use crate::core::storage::StateStore;
use crate::core::CHANNEL_CAPACITY;

/// The accumulated value plus a counter bumped on every fold.
#[derive(Debug)]
struct Versioned<A> {
    value: A,
    version: u64,
}

type Shared<A> = Arc<Mutex<Versioned<A>>>;

/// # Persistent Accumulator
///
/// Owns one [`StateStore`] and folds a stream of events into a value of type
/// `A`. Consumed by [`run`](Self::run) or [`scan`](Self::scan).
#[derive(Debug)]
pub struct PersistentAccumulator<A, S> {
    name: &'static str,
    store: S,
    default: A,
    flush_interval: Duration,
}

impl<A, S> PersistentAccumulator<A, S>
where
    A: Clone + Send + Sync + 'static,
    S: StateStore<A>,
{
    /// Creates an accumulator persisting through `store`. `default` is used when
    /// the store holds nothing usable.
    pub fn new(name: &'static str, store: S, default: A, flush_interval: Duration) -> Self {
        Self {
            name,
            store,
            default,
            flush_interval,
        }
    }

    /// # Run
    ///
    /// Folds `source` into the accumulated value. `seed` may emit something
    /// derived from the loaded value before any event is folded; `fold` mutates
    /// the value and may emit one output per event.
    pub fn run<E, O, Src, Seed, Fold>(
        self,
        source: Src,
        seed: Seed,
        fold: Fold,
        lifecycle: &Lifecycle,
    ) -> ReceiverStream<O>
    where
        E: Send + 'static,
        O: Send + 'static,
        Src: Stream<Item = E> + Send + 'static,
        Seed: FnOnce(&A) -> Option<O> + Send + 'static,
        Fold: FnMut(&mut A, E) -> Option<O> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = lifecycle.token().clone();
        lifecycle.spawn(self.drive(source, seed, fold, tx, cancel));
        ReceiverStream::new(rx)
    }

    /// # Scan
    ///
    /// Emits the loaded (or default) value first, then the running value after
    /// every folded event.
    pub fn scan<E, Src, Fold>(self, source: Src, mut fold: Fold, lifecycle: &Lifecycle) -> ReceiverStream<A>
    where
        E: Send + 'static,
        Src: Stream<Item = E> + Send + 'static,
        Fold: FnMut(&mut A, E) + Send + 'static,
    {
        self.run(
            source,
            |value: &A| Some(value.clone()),
            move |value: &mut A, event| {
                fold(value, event);
                Some(value.clone())
            },
            lifecycle,
        )
    }

    async fn drive<E, O, Src, Seed, Fold>(
        self,
        source: Src,
        seed: Seed,
        mut fold: Fold,
        tx: mpsc::Sender<O>,
        cancel: CancellationToken,
    ) where
        O: Send + 'static,
        Src: Stream<Item = E> + Send + 'static,
        Seed: FnOnce(&A) -> Option<O>,
        Fold: FnMut(&mut A, E) -> Option<O>,
    {
        let Self { name, store, default, flush_interval } = self;

        // --- Phase 1: Load ---
        let initial = match store.load().await {
            Some(value) => {
                tracing::info!(accumulator = name, "Loaded persisted state");
                value
            }
            None => default,
        };
        let store = Arc::new(store);
        let shared: Shared<A> = Arc::new(Mutex::new(Versioned { value: initial, version: 0 }));

        // --- Phase 2: Start the flusher ---
        let stop_flusher = CancellationToken::new();
        let flusher = tokio::spawn(flush_loop(
            name,
            Arc::clone(&store),
            Arc::clone(&shared),
            flush_interval,
            stop_flusher.clone(),
        ));

        // --- Phase 3: Fold ---
        let first = seed(&lock(&shared).value);
        let mut open = match first {
            Some(out) => send_or_stop(&tx, out, &cancel).await,
            None => true,
        };

        tokio::pin!(source);
        while open {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tx.closed() => break,
                next = source.next() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            let out = {
                let mut state = lock(&shared);
                let out = fold(&mut state.value, event);
                state.version += 1;
                out
            };
            if let Some(out) = out {
                open = send_or_stop(&tx, out, &cancel).await;
            }
        }

        // --- Phase 4: Stop the flusher, then flush one last time ---
        stop_flusher.cancel();
        let written = match flusher.await {
            Ok(written) => Some(written),
            Err(e) => {
                tracing::error!(accumulator = name, error = %e, "Flusher task failed");
                None
            }
        };
        flush_once(name, store.as_ref(), &shared, written).await;
        tracing::debug!(accumulator = name, "Accumulator stopped");
        drop(tx);
    }
}

fn lock<A>(shared: &Shared<A>) -> std::sync::MutexGuard<'_, Versioned<A>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Periodic writer. Returns the version of the last successful write.
async fn flush_loop<A, S>(
    name: &'static str,
    store: Arc<S>,
    shared: Shared<A>,
    period: Duration,
    stop: CancellationToken,
) -> u64
where
    A: Clone + Send + Sync + 'static,
    S: StateStore<A>,
{
    let mut written = Some(0);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        written = Some(flush_once(name, store.as_ref(), &shared, written).await);
    }
    written.unwrap_or_default()
}

/// Persists the current value unless `written` already covers it. `None` forces
/// a write. Returns the version now known to be on disk.
async fn flush_once<A, S>(name: &'static str, store: &S, shared: &Shared<A>, written: Option<u64>) -> u64
where
    A: Clone + Send + Sync + 'static,
    S: StateStore<A>,
{
    let (value, version) = {
        let state = lock(shared);
        if written == Some(state.version) {
            return state.version;
        }
        (state.value.clone(), state.version)
    };

    match store.store(&value).await {
        Ok(()) => {
            tracing::debug!(accumulator = name, version, "State flushed");
            version
        }
        Err(e) => {
            tracing::warn!(accumulator = name, error = %e, "State flush failed, will retry");
            written.unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{JsonFileStore, MemoryStore};
    use std::collections::BTreeSet;

    const HOUR: Duration = Duration::from_secs(3600);

    fn insert_all(set: &mut BTreeSet<u32>, n: u32) {
        set.insert(n);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_emits_initial_then_running_values() {
        let lifecycle = Lifecycle::new();
        let store = MemoryStore::with_value(BTreeSet::from([1]));
        let acc = PersistentAccumulator::new("test", store, BTreeSet::new(), HOUR);

        let out: Vec<_> = acc.scan(futures_util::stream::iter([2, 2, 3]), insert_all, &lifecycle).collect().await;

        assert_eq!(
            out,
            vec![
                BTreeSet::from([1]),
                BTreeSet::from([1, 2]),
                BTreeSet::from([1, 2]),
                BTreeSet::from([1, 2, 3]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_cadence_only_when_changed() {
        let lifecycle = Lifecycle::new();
        let store = MemoryStore::new();
        let acc = PersistentAccumulator::new("test", store.clone(), BTreeSet::new(), Duration::from_secs(10));
        let (tx, rx) = mpsc::channel(4);
        let mut out = acc.scan(ReceiverStream::new(rx), insert_all, &lifecycle);
        assert_eq!(out.next().await, Some(BTreeSet::new()));

        // Nothing folded yet: the first tick has nothing to write.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(store.writes(), 0);

        tx.send(7).await.unwrap();
        assert_eq!(out.next().await, Some(BTreeSet::from([7])));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.value(), Some(BTreeSet::from([7])));
        assert_eq!(store.writes(), 1);

        // Idle ticks do not rewrite.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.writes(), 1);
        lifecycle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn final_flush_runs_on_cancel_before_stream_closes() {
        let lifecycle = Lifecycle::new();
        let store = MemoryStore::new();
        let acc = PersistentAccumulator::new("test", store.clone(), BTreeSet::new(), HOUR);
        let (tx, rx) = mpsc::channel(4);
        let mut out = acc.scan(ReceiverStream::new(rx), insert_all, &lifecycle);
        out.next().await;
        tx.send(4).await.unwrap();
        tx.send(5).await.unwrap();
        out.next().await;
        out.next().await;
        assert_eq!(store.writes(), 0);

        lifecycle.token().cancel();
        assert_eq!(out.next().await, None);
        assert_eq!(store.value(), Some(BTreeSet::from([4, 5])));
        lifecycle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn final_flush_runs_when_source_completes() {
        let lifecycle = Lifecycle::new();
        let store = MemoryStore::new();
        let acc = PersistentAccumulator::new("test", store.clone(), BTreeSet::new(), HOUR);

        let out = acc.run(futures_util::stream::iter([1, 2]), |_| None::<()>, |set, n| {
            set.insert(n);
            None
        }, &lifecycle);
        assert_eq!(out.collect::<Vec<()>>().await, vec![]);
        assert_eq!(store.value(), Some(BTreeSet::from([1, 2])));
    }

    #[tokio::test(start_paused = true)]
    async fn write_failures_do_not_stop_the_fold() {
        let lifecycle = Lifecycle::new();
        let store = MemoryStore::new();
        store.set_failing(true);
        let acc = PersistentAccumulator::new("test", store.clone(), BTreeSet::new(), Duration::from_secs(5));
        let (tx, rx) = mpsc::channel(4);
        let mut out = acc.scan(ReceiverStream::new(rx), insert_all, &lifecycle);
        out.next().await;

        tx.send(1).await.unwrap();
        out.next().await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        tx.send(2).await.unwrap();
        assert_eq!(out.next().await, Some(BTreeSet::from([1, 2])));
        assert_eq!(store.value(), None);

        store.set_failing(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.value(), Some(BTreeSet::from([1, 2])));
        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_records.json");
        std::fs::write(&path, "[1, 2,").unwrap();
        let lifecycle = Lifecycle::new();
        let acc = PersistentAccumulator::new("test", JsonFileStore::at(&path), BTreeSet::from([99u32]), HOUR);

        let mut out = acc.scan(futures_util::stream::iter([5]), insert_all, &lifecycle);
        assert_eq!(out.next().await, Some(BTreeSet::from([99])));
        assert_eq!(out.next().await, Some(BTreeSet::from([5, 99])));
        assert_eq!(out.next().await, None);

        // The final flush replaced the corrupt document.
        let repaired: BTreeSet<u32> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(repaired, BTreeSet::from([5, 99]));
    }
}
