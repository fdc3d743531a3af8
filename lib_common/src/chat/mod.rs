//! # Chat Integration
//!
//! Telegram Bot API access for the bot: the HTTP client (which is also the
//! pipeline's [`Notifier`](crate::core::dispatcher::Notifier)), the update
//! feed polled for incoming commands, and the command parser.

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Parsing of `/subscribe`, `/unsubscribe` and `/search`.
pub mod commands;
/// Bot API request and response types.
pub mod model;
/// The Bot API client.
pub mod telegram;
/// `getUpdates` as a poller source.
pub mod updates;

pub use commands::{bot_commands, parse_command};
pub use telegram::{ChatError, TelegramClient};
pub use updates::{command_stream, UpdateFeed};

/// Public Bot API endpoint.
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
