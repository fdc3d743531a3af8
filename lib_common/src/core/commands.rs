//! # Command Handling
//!
//! Chat commands arrive already parsed into [`Command`]s. This stage validates
//! them and splits them into three streams: subscription changes for the
//! [`SubscriptionStore`](crate::core::subscriptions::SubscriptionStore), search
//! requests for the router, and immediate replies (acknowledgments and
//! rejections) for the dispatcher. Invalid filters never reach the store.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use futures_util::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::lifecycle::{send_or_stop, Lifecycle};
use crate::core::model::{ChatId, Filter, OutboundMessage, Subscription};
use crate::core::subscriptions::SubscriptionChange;
use crate::core::CHANNEL_CAPACITY;

/// A user intent parsed from a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/subscribe <filter>`
    Subscribe {
        /// Requesting chat.
        chat_id: ChatId,
        /// Unvalidated filter text.
        filter: String,
    },
    /// `/unsubscribe <filter>`
    Unsubscribe {
        /// Requesting chat.
        chat_id: ChatId,
        /// Unvalidated filter text.
        filter: String,
    },
    /// `/search <query>`
    Search(SearchRequest),
}

/// An ad-hoc search against the latest catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Requesting chat.
    pub chat_id: ChatId,
    /// Text matched against item titles. May be empty.
    pub query: String,
}

/// What a single command turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// A valid subscription change and its acknowledgment.
    Change(SubscriptionChange, Option<OutboundMessage>),
    /// A search to answer against the catalog.
    Search(SearchRequest),
    /// A rejection to send back.
    Rejected(Option<OutboundMessage>),
}

/// Validates one command.
pub fn handle(command: Command) -> Handled {
    match command {
        Command::Subscribe { chat_id, filter } => match Filter::parse(filter.trim()) {
            Ok(filter) => {
                let ack = reply(chat_id, format!("You will now receive updates for \"{filter}\"."));
                Handled::Change(SubscriptionChange::Subscribe(Subscription { chat_id, filter }), ack)
            }
            Err(e) => reject(chat_id, &filter, &e),
        },
        Command::Unsubscribe { chat_id, filter } => match Filter::parse(filter.trim()) {
            Ok(filter) => {
                let ack = reply(chat_id, format!("You will no longer receive updates for \"{filter}\"."));
                Handled::Change(SubscriptionChange::Unsubscribe(Subscription { chat_id, filter }), ack)
            }
            Err(e) => reject(chat_id, &filter, &e),
        },
        Command::Search(request) => Handled::Search(request),
    }
}

fn reject(chat_id: ChatId, filter: &str, error: &dyn std::error::Error) -> Handled {
    tracing::info!(%chat_id, filter, error = %error, "Rejected subscription filter");
    Handled::Rejected(reply(chat_id, "Invalid subscription filter."))
}

fn reply(chat_id: ChatId, text: impl Into<String>) -> Option<OutboundMessage> {
    match OutboundMessage::new(chat_id, text) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(%chat_id, error = %e, "Reply dropped");
            None
        }
    }
}

/// The three outputs of [`split_commands`].
#[derive(Debug)]
pub struct CommandStreams {
    /// Valid subscription changes, in arrival order.
    pub changes: ReceiverStream<SubscriptionChange>,
    /// Search requests, in arrival order.
    pub searches: ReceiverStream<SearchRequest>,
    /// Acknowledgments and rejections.
    pub replies: ReceiverStream<OutboundMessage>,
}

/// Validates `commands` and fans them out by kind.
pub fn split_commands<S>(commands: S, lifecycle: &Lifecycle) -> CommandStreams
where
    S: Stream<Item = Command> + Send + 'static,
{
    let (change_tx, change_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (search_tx, search_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (reply_tx, reply_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = lifecycle.token().clone();

    lifecycle.spawn(async move {
        tokio::pin!(commands);
        loop {
            let command = tokio::select! {
                _ = cancel.cancelled() => break,
                next = commands.next() => match next {
                    Some(command) => command,
                    None => break,
                },
            };
            tracing::debug!(?command, "Command received");

            let (change, search, reply) = match handle(command) {
                Handled::Change(change, ack) => (Some(change), None, ack),
                Handled::Search(request) => (None, Some(request), None),
                Handled::Rejected(reply) => (None, None, reply),
            };
            // Closed outputs are tolerated: the remaining ones keep flowing.
            if let Some(change) = change {
                if !send_or_stop(&change_tx, change, &cancel).await && cancel.is_cancelled() {
                    break;
                }
            }
            if let Some(search) = search {
                if !send_or_stop(&search_tx, search, &cancel).await && cancel.is_cancelled() {
                    break;
                }
            }
            if let Some(reply) = reply {
                if !send_or_stop(&reply_tx, reply, &cancel).await && cancel.is_cancelled() {
                    break;
                }
            }
        }
    });

    CommandStreams {
        changes: ReceiverStream::new(change_rx),
        searches: ReceiverStream::new(search_rx),
        replies: ReceiverStream::new(reply_rx),
    }
}
