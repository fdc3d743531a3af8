//! # Deduplicator
//!
//! Suppresses anything whose identity key has been seen before, across
//! restarts. The seen-key set is a [`PersistentAccumulator`]; only the items
//! travel downstream, the keys only ever go to storage.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::BTreeSet;
use std::time::Duration;

use futures_util::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::accumulator::PersistentAccumulator;
use crate::core::lifecycle::Lifecycle;
use crate::core::storage::StateStore;

/// Durable "seen before?" filter over keys of type `K`.
#[derive(Debug)]
pub struct Deduplicator<K, S> {
    accumulator: PersistentAccumulator<BTreeSet<K>, S>,
}

impl<K, S> Deduplicator<K, S>
where
    K: Ord + Clone + Send + Sync + 'static,
    S: StateStore<BTreeSet<K>>,
{
    /// Creates a deduplicator whose seen-key set lives in `store`.
    pub fn new(store: S, flush_interval: Duration) -> Self {
        Self {
            accumulator: PersistentAccumulator::new("dedup", store, BTreeSet::new(), flush_interval),
        }
    }

    /// Emits each item whose `key_of` has not been seen, and records every key.
    pub fn dedupe<T, Src, F>(self, source: Src, key_of: F, lifecycle: &Lifecycle) -> ReceiverStream<T>
    where
        T: Send + 'static,
        Src: Stream<Item = T> + Send + 'static,
        F: Fn(&T) -> K + Send + 'static,
    {
        self.accumulator.run(
            source,
            |seen: &BTreeSet<K>| {
                tracing::info!(known = seen.len(), "Deduplicator ready");
                None
            },
            move |seen: &mut BTreeSet<K>, item| seen.insert(key_of(&item)).then_some(item),
            lifecycle,
        )
    }
}
