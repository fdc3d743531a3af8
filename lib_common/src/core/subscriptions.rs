//! # Subscription Store
//!
//! The durable set of (chat, filter) pairs. Runs a [`PersistentAccumulator`] in
//! scan mode: it emits the loaded set once at start and the whole set after
//! every change. Consumers keep only the newest value through a
//! [`LatestCell`](crate::core::hub::LatestCell).

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::accumulator::PersistentAccumulator;
use crate::core::lifecycle::Lifecycle;
use crate::core::model::{Subscription, SubscriptionSet};
use crate::core::storage::StateStore;

/// A validated change to the subscription set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionChange {
    /// Start alerting the chat for the filter.
    Subscribe(Subscription),
    /// Stop alerting the chat for the filter.
    Unsubscribe(Subscription),
}

impl SubscriptionChange {
    /// Applies the change to `set`. Returns whether the set changed.
    pub fn apply(self, set: &mut SubscriptionSet) -> bool {
        match self {
            Self::Subscribe(sub) => set.insert(sub),
            Self::Unsubscribe(sub) => set.remove(&sub),
        }
    }
}

/// Durable subscription set.
#[derive(Debug)]
pub struct SubscriptionStore<S> {
    accumulator: PersistentAccumulator<SubscriptionSet, S>,
}

impl<S> SubscriptionStore<S>
where
    S: StateStore<SubscriptionSet>,
{
    /// Creates a store persisting through `store`.
    pub fn new(store: S, flush_interval: Duration) -> Self {
        Self {
            accumulator: PersistentAccumulator::new("subscriptions", store, SubscriptionSet::new(), flush_interval),
        }
    }

    /// Folds `changes` into the set. The first value is the loaded set, even
    /// when it is empty.
    pub fn run<Src>(self, changes: Src, lifecycle: &Lifecycle) -> ReceiverStream<Arc<SubscriptionSet>>
    where
        Src: Stream<Item = SubscriptionChange> + Send + 'static,
    {
        self.accumulator.run(
            changes,
            |set: &SubscriptionSet| {
                tracing::info!(subscriptions = set.len(), "Subscriptions loaded");
                Some(Arc::new(set.clone()))
            },
            |set: &mut SubscriptionSet, change: SubscriptionChange| {
                tracing::debug!(?change, "Applying subscription change");
                if change.apply(set) {
                    tracing::info!(subscriptions = set.len(), "Subscription set updated");
                }
                Some(Arc::new(set.clone()))
            },
            lifecycle,
        )
    }
}
