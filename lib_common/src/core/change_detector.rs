//! # Change Detector
//!
//! Turns a stream of full snapshots into a stream of newly-appeared elements.
//! Only the previous snapshot is kept; the very first snapshot is diffed
//! against the empty set, so everything in it comes out once at start-up.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};

/// Remembers the previous snapshot and reports what the next one adds.
#[derive(Debug)]
pub struct ChangeDetector<T> {
    previous: Arc<HashSet<T>>,
}

impl<T> Default for ChangeDetector<T> {
    fn default() -> Self {
        Self { previous: Arc::new(HashSet::new()) }
    }
}

impl<T> ChangeDetector<T>
where
    T: Clone + Eq + Hash,
{
    /// A detector seeded with the empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Elements of `snapshot` that were not in the previous one. Equality is
    /// structural, so an element whose fields changed counts as new.
    pub fn observe(&mut self, snapshot: Arc<HashSet<T>>) -> Vec<T> {
        let added: Vec<T> = snapshot.difference(&self.previous).cloned().collect();
        tracing::debug!(snapshot = snapshot.len(), added = added.len(), "Snapshot diffed");
        self.previous = snapshot;
        added
    }
}

/// Stream form of [`ChangeDetector::observe`].
pub fn diff<T, S>(snapshots: S) -> impl Stream<Item = T> + Send + 'static
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
    S: Stream<Item = Arc<HashSet<T>>> + Send + 'static,
{
    let mut detector = ChangeDetector::new();
    snapshots.flat_map(move |snapshot| stream::iter(detector.observe(snapshot)))
}
