//! # Update Feed
//!
//! `getUpdates` as a [`SnapshotSource`], so the same [`Poller`] that drives the
//! catalog also drives the chat. The feed owns the update cursor: each batch
//! moves it past the highest update id seen, which confirms those updates to
//! Telegram on the next call. The cursor lives in the feed rather than in the
//! poller, so it survives the poller being restarted after an error.
//!
//! [`Poller`]: crate::core::poller::Poller

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};

use crate::chat::commands::command_from_update;
use crate::chat::model::Update;
use crate::chat::telegram::{ChatError, TelegramClient};
use crate::core::commands::Command;
use crate::core::poller::SnapshotSource;

/// Cursor-tracking `getUpdates` source.
pub struct UpdateFeed {
    client: Arc<TelegramClient>,
    cursor: AtomicI64,
}

impl UpdateFeed {
    /// A feed starting from whatever Telegram still holds unconfirmed.
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self { client, cursor: AtomicI64::new(0) }
    }

    /// The offset the next call will send; 0 means none yet.
    pub fn cursor(&self) -> i64 {
        self.cursor.load(Ordering::SeqCst)
    }
}

/// The cursor after receiving `updates` while at `current`.
pub fn next_offset(current: i64, updates: &[Update]) -> i64 {
    updates
        .iter()
        .map(|u| u.update_id + 1)
        .max()
        .map_or(current, |next| next.max(current))
}

impl SnapshotSource for UpdateFeed {
    type Snapshot = Vec<Update>;
    type Error = ChatError;

    async fn fetch(&self) -> Result<Vec<Update>, ChatError> {
        let current = self.cursor();
        let offset = (current > 0).then_some(current);
        let updates = self.client.get_updates(offset).await?;
        if !updates.is_empty() {
            let next = next_offset(current, &updates);
            self.cursor.store(next, Ordering::SeqCst);
            tracing::debug!(received = updates.len(), cursor = next, "Updates received");
        }
        Ok(updates)
    }
}

/// Flattens update batches into the commands they carry.
pub fn command_stream<S>(batches: S) -> impl Stream<Item = Command> + Send + 'static
where
    S: Stream<Item = Vec<Update>> + Send + 'static,
{
    batches.flat_map(|batch| {
        let commands: Vec<Command> = batch.iter().filter_map(command_from_update).collect();
        stream::iter(commands)
    })
}
