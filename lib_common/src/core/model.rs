//! # Domain Model
//!
//! The value types that flow through the pipeline: catalog items and
//! snapshots, chat identities, validated subscription filters and outbound
//! messages.
//!
//! Two notions of "sameness" coexist on purpose. `Item` derives full
//! structural equality, which the change detector uses to spot anything that
//! differs between polls. `ItemKey` is the stable identity used by the
//! deduplicator. An item whose price changes is therefore "new" to the change
//! detector but already known to the deduplicator.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of characters the chat platform accepts in one message.
pub const MAX_MESSAGE_CHARS: usize = 4095;

/// Inclusive bounds on the length of a subscription filter, in characters.
pub const FILTER_MIN_CHARS: usize = 3;
/// See [`FILTER_MIN_CHARS`].
pub const FILTER_MAX_CHARS: usize = 255;

static FILTER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?-u:\w)+$").unwrap_or_else(|e| unreachable!("static filter pattern is valid: {e}"))
});

/// Stable identity of a catalog record, used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(pub String);

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// # Item
///
/// A single sale item as observed in one catalog snapshot. Every field takes
/// part in equality and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Identity key, stable across polls.
    pub key: ItemKey,
    /// Display title, e.g. "Grey Sofa".
    pub title: String,
    /// Formatted sales price as delivered by the source.
    pub sales_price: Option<String>,
    /// Formatted list (pre-discount) price.
    pub list_price: Option<String>,
    /// Human readable discount, e.g. "-40%".
    pub discount_text: Option<String>,
    /// Name of the store or warehouse holding the item.
    pub location: Option<String>,
    /// Path fragment appended to the product URL base.
    pub url_path: Option<String>,
}

impl Item {
    /// One-line description used both for filter matching and in messages:
    /// title, sales price, discount and location joined by `" - "`. Missing
    /// parts are left out.
    pub fn blurb(&self) -> String {
        let parts = [
            Some(self.title.as_str()),
            self.sales_price.as_deref(),
            self.discount_text.as_deref(),
            self.location.as_deref(),
        ];
        parts
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" - ")
    }

    /// Absolute product URL under `base`.
    pub fn url(&self, base: &str) -> String {
        let path = self.url_path.as_deref().unwrap_or_default();
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

/// The full catalog at one poll tick. Shared behind an `Arc` because the same
/// snapshot is broadcast to several stages.
pub type CatalogSnapshot = Arc<HashSet<Item>>;

/// Chat identifier on the messaging platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reasons a subscription filter is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// Fewer than [`FILTER_MIN_CHARS`] or more than [`FILTER_MAX_CHARS`] characters.
    #[error("filter must be {FILTER_MIN_CHARS}-{FILTER_MAX_CHARS} characters long, got {0}")]
    Length(usize),
    /// Contains something other than letters, digits or underscores.
    #[error("filter may only contain letters, digits and underscores")]
    Charset,
}

/// # Filter
///
/// A validated subscription filter: 3-255 ASCII word characters (`a-z`,
/// `A-Z`, `0-9` and `_`). Matching is a case-insensitive substring test.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(String);

impl Filter {
    /// Validates `text` as a filter.
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let chars = text.chars().count();
        if !(FILTER_MIN_CHARS..=FILTER_MAX_CHARS).contains(&chars) {
            return Err(FilterError::Length(chars));
        }
        if !FILTER_PATTERN.is_match(text) {
            return Err(FilterError::Charset);
        }
        Ok(Self(text.to_string()))
    }

    /// The filter text as the user typed it.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive substring match against `text`.
    pub fn matches(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.0.to_lowercase())
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A (chat, filter) pair. Ordered so the persisted set is stable on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Chat that receives the alerts.
    pub chat_id: ChatId,
    /// Filter matched against new items.
    pub filter: Filter,
}

/// Every active subscription.
pub type SubscriptionSet = BTreeSet<Subscription>;

/// Precondition failures when building an [`OutboundMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// The text is empty.
    #[error("message text is empty")]
    Empty,
    /// The text exceeds [`MAX_MESSAGE_CHARS`].
    #[error("message text has {0} characters, the limit is {MAX_MESSAGE_CHARS}")]
    TooLong(usize),
}

/// # Outbound Message
///
/// A text bound for one chat. The constructor enforces the platform limit of
/// 1-4095 characters; nothing is ever truncated silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    chat_id: ChatId,
    text: String,
}

impl OutboundMessage {
    /// Builds a message, failing on empty or oversized text.
    pub fn new(chat_id: ChatId, text: impl Into<String>) -> Result<Self, MessageError> {
        let text = text.into();
        let chars = text.chars().count();
        if chars == 0 {
            return Err(MessageError::Empty);
        }
        if chars > MAX_MESSAGE_CHARS {
            return Err(MessageError::TooLong(chars));
        }
        Ok(Self { chat_id, text })
    }

    /// Recipient.
    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// Message body.
    pub fn text(&self) -> &str {
        &self.text
    }
}
