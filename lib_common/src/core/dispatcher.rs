//! # Message Dispatcher
//!
//! The single consumer at the end of the pipeline. Takes outbound messages in
//! arrival order and hands them, one at a time, to a [`Notifier`].
//!
//! ## Delivery Policy:
//! - **Transient failures** (network errors, 5xx, 429) are retried forever with
//!   a fixed backoff. The message at the head of the line blocks the ones
//!   behind it, which keeps ordering intact.
//! - **Rejections** (any other 4xx) will not succeed on retry; they are logged
//!   and the message is dropped.
//! - Shutdown interrupts a pending retry; the undelivered message is lost.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{Stream, StreamExt};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::core::lifecycle::Lifecycle;
use crate::core::model::OutboundMessage;
use crate::core::retry::FixedBackoff;

/// Why a delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Worth retrying.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// The platform refused the message for good.
    #[error("message rejected: {0}")]
    Rejected(String),
}

/// # Notifier
///
/// Delivers one text message to one chat.
pub trait Notifier: Send + Sync + 'static {
    /// Sends `message`.
    fn deliver(&self, message: &OutboundMessage) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// Counters reported when the dispatcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages the notifier accepted.
    pub delivered: u64,
    /// Messages dropped after a rejection.
    pub rejected: u64,
    /// Transient failures that were retried.
    pub retries: u64,
}

/// Sequential, retrying delivery through a [`Notifier`].
#[derive(Debug)]
pub struct Dispatcher<N> {
    notifier: Arc<N>,
    backoff: FixedBackoff,
}

impl<N: Notifier> Dispatcher<N> {
    /// A dispatcher sending through `notifier`.
    pub fn new(notifier: Arc<N>, backoff: FixedBackoff) -> Self {
        Self { notifier, backoff }
    }

    /// Delivers every message of `messages` until it ends or shutdown begins.
    pub fn run<S>(self, messages: S, lifecycle: &Lifecycle) -> JoinHandle<DispatchStats>
    where
        S: Stream<Item = OutboundMessage> + Send + 'static,
    {
        let cancel = lifecycle.token().clone();
        lifecycle.spawn(async move {
            let mut stats = DispatchStats::default();
            tokio::pin!(messages);

            'messages: loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = messages.next() => match next {
                        Some(message) => message,
                        None => break,
                    },
                };

                loop {
                    let attempt = tokio::select! {
                        _ = cancel.cancelled() => break 'messages,
                        result = self.notifier.deliver(&message) => result,
                    };
                    match attempt {
                        Ok(()) => {
                            stats.delivered += 1;
                            tracing::debug!(chat_id = %message.chat_id(), "Message delivered");
                            break;
                        }
                        Err(DeliveryError::Rejected(reason)) => {
                            stats.rejected += 1;
                            tracing::warn!(chat_id = %message.chat_id(), reason = %reason, "Message rejected, dropped");
                            break;
                        }
                        Err(DeliveryError::Transient(reason)) => {
                            stats.retries += 1;
                            tracing::warn!(chat_id = %message.chat_id(), reason = %reason, retry_in = ?self.backoff.delay(), "Delivery failed, retrying");
                            if !self.backoff.wait(&cancel).await {
                                break 'messages;
                            }
                        }
                    }
                }
            }

            tracing::info!(delivered = stats.delivered, rejected = stats.rejected, retries = stats.retries, "Dispatcher stopped");
            stats
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ChatId;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records deliveries and fails according to a script.
    #[derive(Default)]
    struct Scripted {
        failures: Mutex<VecDeque<DeliveryError>>,
        delivered: Mutex<Vec<String>>,
    }

    impl Notifier for Scripted {
        async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
            if let Some(failure) = self.failures.lock().unwrap().pop_front() {
                return Err(failure);
            }
            self.delivered.lock().unwrap().push(message.text().to_string());
            Ok(())
        }
    }

    fn msg(text: &str) -> OutboundMessage {
        OutboundMessage::new(ChatId(1), text).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_and_keep_order() {
        let notifier = Arc::new(Scripted::default());
        notifier.failures.lock().unwrap().extend([
            DeliveryError::Transient("503".into()),
            DeliveryError::Transient("timeout".into()),
        ]);
        let dispatcher = Dispatcher::new(Arc::clone(&notifier), FixedBackoff::new(Duration::from_secs(10)));

        let messages = futures_util::stream::iter([msg("a"), msg("b")]);
        let stats = dispatcher.run(messages, &Lifecycle::new()).await.unwrap();

        assert_eq!(*notifier.delivered.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(stats, DispatchStats { delivered: 2, rejected: 0, retries: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn rejections_are_dropped() {
        let notifier = Arc::new(Scripted::default());
        notifier.failures.lock().unwrap().push_back(DeliveryError::Rejected("chat not found".into()));
        let dispatcher = Dispatcher::new(Arc::clone(&notifier), FixedBackoff::new(Duration::from_secs(10)));

        let messages = futures_util::stream::iter([msg("a"), msg("b")]);
        let stats = dispatcher.run(messages, &Lifecycle::new()).await.unwrap();

        assert_eq!(*notifier.delivered.lock().unwrap(), vec!["b"]);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_endless_retry() {
        let notifier = Arc::new(Scripted::default());
        notifier.failures.lock().unwrap().extend((0..1000).map(|_| DeliveryError::Transient("down".into())));
        let lifecycle = Lifecycle::new();
        let dispatcher = Dispatcher::new(Arc::clone(&notifier), FixedBackoff::new(Duration::from_secs(10)));
        let handle = dispatcher.run(futures_util::stream::iter([msg("a")]), &lifecycle);

        tokio::time::sleep(Duration::from_secs(35)).await;
        lifecycle.shutdown().await;
        let stats = handle.await.unwrap();
        assert_eq!(stats.delivered, 0);
        assert!(stats.retries >= 3);
    }
}
