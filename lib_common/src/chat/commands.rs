//! # Chat Command Parsing
//!
//! Recognises `/subscribe`, `/unsubscribe` and `/search` in message text. The
//! command may carry the bot's `@username` suffix, as Telegram adds it in group
//! chats. Argument validation happens later, in the core command stage.

use crate::chat::model::{BotCommand, Update};
use crate::core::commands::{Command, SearchRequest};
use crate::core::model::ChatId;

/// The command menu registered with `setMyCommands`.
pub fn bot_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("subscribe", "Subscribe to price alerts."),
        BotCommand::new("unsubscribe", "Unsubscribe to price alerts."),
        BotCommand::new("search", "Search in sale items."),
    ]
}

/// Parses `text` sent in `chat_id`. Returns `None` for anything that is not
/// one of the bot's commands.
pub fn parse_command(chat_id: ChatId, text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, argument) = match rest.split_once(char::is_whitespace) {
        Some((head, argument)) => (head, argument.trim()),
        None => (rest, ""),
    };
    let name = head.split_once('@').map_or(head, |(name, _bot)| name);

    match name {
        "subscribe" => Some(Command::Subscribe { chat_id, filter: argument.to_string() }),
        "unsubscribe" => Some(Command::Unsubscribe { chat_id, filter: argument.to_string() }),
        "search" => Some(Command::Search(SearchRequest { chat_id, query: argument.to_string() })),
        _ => None,
    }
}

/// The command carried by a new message, if any. Edited messages are ignored.
pub fn command_from_update(update: &Update) -> Option<Command> {
    let message = update.message.as_ref()?;
    let text = message.text.as_deref()?;
    let command = parse_command(ChatId(message.chat.id), text);
    if command.is_none() {
        tracing::trace!(update_id = update.update_id, "Update carries no command");
    }
    command
}
