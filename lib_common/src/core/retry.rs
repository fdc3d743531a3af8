//! # Fixed-Backoff Retry
//!
//! Transient failures anywhere in the pipeline are retried forever after a
//! constant delay. Waiting is always cancellable so shutdown never sits out a
//! backoff.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::fmt::Display;
use std::time::Duration;

use futures_util::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::core::lifecycle::{send_or_stop, Lifecycle};

/// Constant delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    /// A backoff waiting `delay` between attempts.
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// The configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleeps for one backoff period. Returns `false` if shutdown began while
    /// waiting.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}

/// # Retry Forever
///
/// Runs the fallible stream produced by `make`, forwarding its `Ok` values.
/// When it yields an error, or simply ends, the error is logged and a fresh
/// stream is created after one backoff period. The returned stream only ends
/// on shutdown.
pub fn retry_forever<T, E, S, F>(
    label: &'static str,
    mut make: F,
    backoff: FixedBackoff,
    capacity: usize,
    lifecycle: &Lifecycle,
) -> ReceiverStream<T>
where
    T: Send + 'static,
    E: Display + Send + 'static,
    S: Stream<Item = Result<T, E>> + Send + 'static,
    F: FnMut() -> S + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = lifecycle.token().clone();

    lifecycle.spawn(async move {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let stream = make();
            tokio::pin!(stream);

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(value)) => {
                        if !send_or_stop(&tx, value, &cancel).await {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(stream = label, attempt, error = %e, retry_in = ?backoff.delay(), "Stream failed, restarting after backoff");
                        break;
                    }
                    None => {
                        tracing::warn!(stream = label, attempt, retry_in = ?backoff.delay(), "Stream ended, restarting after backoff");
                        break;
                    }
                }
            }

            if !backoff.wait(&cancel).await {
                return;
            }
        }
    });

    ReceiverStream::new(rx)
}
