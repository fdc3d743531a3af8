//! # Core Engine Module
//!
//! The persistent reactive pipeline behind the outlet alert bot. Everything in
//! here is transport-agnostic: the catalog and chat clients plug in through the
//! [`SnapshotSource`](poller::SnapshotSource) and
//! [`Notifier`](dispatcher::Notifier) traits.
//!
//! ## Core Components:
//!
//! - **`accumulator`**: the durable fold every piece of persistent state is
//!   built on, backed by **`storage`**.
//! - **`change_detector`** and **`dedup`**: turn full snapshots into items that
//!   were never reported before, even across restarts.
//! - **`subscriptions`** and **`commands`**: the validated subscription set and
//!   the command intake feeding it.
//! - **`poller`** and **`retry`**: overlap-free periodic fetching with endless
//!   fixed-backoff restarts.
//! - **`hub`**, **`router`** and **`dispatcher`**: fan-out, latest-value joins
//!   and ordered delivery.
//! - **`pipeline`**: the wiring of all of the above.

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Durable fold over an event stream.
pub mod accumulator;
/// Snapshot-to-snapshot difference.
pub mod change_detector;
/// Validation and splitting of chat commands.
pub mod commands;
/// Persistent "seen before" filter.
pub mod dedup;
/// Ordered, retrying delivery of outbound messages.
pub mod dispatcher;
/// Broadcast fan-out and latest-value cells.
pub mod hub;
/// Cancellation and task tracking.
pub mod lifecycle;
/// Domain value types.
pub mod model;
/// Stage wiring.
pub mod pipeline;
/// Periodic snapshot fetching.
pub mod poller;
/// Fixed-backoff retry.
pub mod retry;
/// Joins of new items and searches against the latest state.
pub mod router;
/// JSON state files and key claims.
pub mod storage;
/// The durable subscription set.
pub mod subscriptions;

/// Capacity of the bounded channels between stages.
pub const CHANNEL_CAPACITY: usize = 64;

// --- Public API Re-exports ---
pub use accumulator::PersistentAccumulator;
pub use commands::{Command, SearchRequest};
pub use dispatcher::{DeliveryError, Dispatcher, Notifier};
pub use hub::{Hub, LatestCell};
pub use lifecycle::Lifecycle;
pub use model::{CatalogSnapshot, ChatId, Filter, Item, ItemKey, OutboundMessage, Subscription, SubscriptionSet};
pub use pipeline::{PipelineConfig, PipelineHandle};
pub use poller::{Poller, SnapshotSource};
pub use retry::{retry_forever, FixedBackoff};
pub use router::RouterConfig;
pub use storage::{JsonFileStore, MemoryStore, StateDir, StateStore, StorageError};
