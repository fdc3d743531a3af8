//! # Pipeline Topology
//!
//! Wires the stages into the one supported topology:
//!
//! ```text
//! catalog poller ─retry─▶ snapshot hub ─┬─▶ diff ─▶ dedup ─▶ router.alerts ──┐
//!                                       └─▶ latest catalog cell             │
//! commands ─▶ split ─┬─▶ subscription store ─▶ latest subscriptions cell    ├─▶ dispatcher ─▶ notifier
//!                    ├─▶ router.replies (search) ───────────────────────────┤
//!                    └─▶ acknowledgments / rejections ──────────────────────┘
//! ```
//!
//! The diff branch reads the hub losslessly, so a stalled dispatcher holds back
//! the poller (ticks are dropped, snapshots are not). The catalog cell may skip
//! stale snapshots.
//!
//! Every stage is spawned on the shared [`Lifecycle`]; cancelling it stops the
//! pipeline and [`Lifecycle::shutdown`] returns once both accumulators have
//! written their final state.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::task::JoinHandle;

use crate::core::change_detector::diff;
use crate::core::commands::{split_commands, Command};
use crate::core::dedup::Deduplicator;
use crate::core::dispatcher::{DispatchStats, Dispatcher, Notifier};
use crate::core::hub::{Hub, LatestCell};
use crate::core::lifecycle::Lifecycle;
use crate::core::model::{CatalogSnapshot, Item, OutboundMessage, SubscriptionSet};
use crate::core::poller::{Poller, SnapshotSource};
use crate::core::retry::{retry_forever, FixedBackoff};
use crate::core::router::{Router, RouterConfig};
use crate::core::storage::{StateDir, StorageError};
use crate::core::subscriptions::SubscriptionStore;
use crate::core::CHANNEL_CAPACITY;

/// Storage key of the subscription set.
pub const SUBSCRIPTIONS_KEY: &str = "subscriptions";
/// Storage key of the processed-key set.
pub const PROCESSED_RECORDS_KEY: &str = "processed_records";

/// Timing and routing settings for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Catalog polling period.
    pub poll_interval: Duration,
    /// Accumulator flush cadence.
    pub flush_interval: Duration,
    /// Delay before restarting a failed stream or redelivering a message.
    pub retry_backoff: Duration,
    /// Alert and search formatting.
    pub router: RouterConfig,
}

/// Handles onto a running pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    /// Newest subscription set.
    pub subscriptions: LatestCell<Arc<SubscriptionSet>>,
    /// Newest catalog snapshot.
    pub catalog: LatestCell<CatalogSnapshot>,
    /// Completes with delivery counters once the dispatcher stops.
    pub dispatcher: JoinHandle<DispatchStats>,
}

/// # Spawn
///
/// Starts the pipeline. Both storage keys are claimed up front, so a second
/// pipeline over the same state directory fails here instead of racing on the
/// files.
pub fn spawn<C, N, Cmd>(
    config: PipelineConfig,
    catalog_source: Arc<C>,
    commands: Cmd,
    notifier: Arc<N>,
    state: &StateDir,
    lifecycle: &Lifecycle,
) -> Result<PipelineHandle, StorageError>
where
    C: SnapshotSource<Snapshot = CatalogSnapshot>,
    N: Notifier,
    Cmd: Stream<Item = Command> + Send + 'static,
{
    let processed_store = state.open(PROCESSED_RECORDS_KEY)?;
    let subscription_store = state.open(SUBSCRIPTIONS_KEY)?;
    let backoff = FixedBackoff::new(config.retry_backoff);

    // --- Phase 1: Catalog snapshots, fanned out through a hub ---
    let poller = Poller::new("catalog", catalog_source, config.poll_interval);
    let poll_lifecycle = lifecycle.clone();
    let snapshots = retry_forever("catalog", move || poller.poll(&poll_lifecycle), backoff, CHANNEL_CAPACITY, lifecycle);

    // Diffing needs every snapshot in order; search only needs the newest.
    let mut hub: Hub<CatalogSnapshot> = Hub::new("catalog", CHANNEL_CAPACITY);
    let for_diff = hub.subscribe_lossless();
    let for_search = hub.subscribe();
    hub.connect(snapshots, lifecycle);

    let catalog = LatestCell::new();
    catalog.follow(for_search, lifecycle);

    // --- Phase 2: Commands and subscription state ---
    let commands = split_commands(commands, lifecycle);
    let subscriptions = LatestCell::new();
    let subscription_sets = SubscriptionStore::new(subscription_store, config.flush_interval).run(commands.changes, lifecycle);
    subscriptions.follow(subscription_sets, lifecycle);

    // --- Phase 3: New items ---
    let router = Router::new(config.router, subscriptions.clone(), catalog.clone());
    let new_items = Deduplicator::new(processed_store, config.flush_interval).dedupe(
        diff(for_diff),
        |item: &Item| item.key.clone(),
        lifecycle,
    );

    // --- Phase 4: Everything outbound goes through one dispatcher ---
    let outbound: Vec<BoxStream<'static, OutboundMessage>> = vec![
        commands.replies.boxed(),
        router.replies(commands.searches).boxed(),
        router.alerts(new_items).boxed(),
    ];
    let dispatcher = Dispatcher::new(notifier, backoff).run(stream::select_all(outbound), lifecycle);

    tracing::info!(state_dir = %state.root().display(), "Pipeline started");
    Ok(PipelineHandle { subscriptions, catalog, dispatcher })
}
