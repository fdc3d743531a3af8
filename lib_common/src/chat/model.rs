//! # Telegram Bot API Types
//!
//! Request and response shapes for the handful of Bot API methods the bot
//! calls. Unknown response fields are ignored.

use serde::{Deserialize, Serialize};

/// Envelope of every Bot API response.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramResult<T> {
    /// Whether the call succeeded.
    pub ok: bool,
    /// The payload, present when `ok`.
    pub result: Option<T>,
    /// Human-readable error, present when not `ok`.
    pub description: Option<String>,
    /// Error code mirroring the HTTP status.
    pub error_code: Option<u16>,
}

/// A Telegram user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: i64,
    /// `@username`, if set.
    pub username: Option<String>,
}

/// A private chat, group or channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    /// Chat id; negative for groups.
    pub id: i64,
    /// "private", "group", "supergroup" or "channel".
    #[serde(rename = "type")]
    pub kind: String,
    /// Title of groups and channels.
    pub title: Option<String>,
}

/// An incoming or sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Id within the chat.
    pub message_id: i64,
    /// Sender, absent for channel posts.
    pub from: Option<User>,
    /// The chat the message belongs to.
    pub chat: Chat,
    /// Text, absent for media messages.
    pub text: Option<String>,
}

/// One entry of `getUpdates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Monotonic update id; the cursor advances past it.
    pub update_id: i64,
    /// New incoming message.
    pub message: Option<Message>,
    /// Edited message; ignored by the bot.
    pub edited_message: Option<Message>,
}

/// An entry of the bot's command menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotCommand {
    /// Command name without the slash.
    pub command: String,
    /// Menu description.
    pub description: String,
}

impl BotCommand {
    /// Builds a menu entry.
    pub fn new(command: &str, description: &str) -> Self {
        Self { command: command.to_string(), description: description.to_string() }
    }
}

/// `sendMessage` body.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    /// Recipient chat.
    pub chat_id: i64,
    /// Message text.
    pub text: &'a str,
}

/// `getUpdates` body.
#[derive(Debug, Clone, Serialize)]
pub struct GetUpdatesRequest {
    /// First update id to return; `None` means "everything unconfirmed".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Maximum updates per call.
    pub limit: u32,
    /// Long-poll timeout in seconds; 0 means short polling.
    pub timeout: u32,
    /// Update kinds to receive.
    pub allowed_updates: Vec<String>,
}

/// `setMyCommands` body.
#[derive(Debug, Clone, Serialize)]
pub struct SetMyCommandsRequest<'a> {
    /// The full menu.
    pub commands: &'a [BotCommand],
}
