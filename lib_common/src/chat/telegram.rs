//! # Telegram Client
//!
//! Thin Bot API client over [`ApiClient`]. Every method is a JSON `POST` to
//! `<api url>/bot<token>/<method>` answered by a [`TelegramResult`] envelope.

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::chat::model::{
    BotCommand, GetUpdatesRequest, Message, SendMessageRequest, SetMyCommandsRequest, TelegramResult, Update,
};
use crate::core::dispatcher::{DeliveryError, Notifier};
use crate::core::model::OutboundMessage;
use crate::retrieve::ky_http::ApiClient;

/// Maximum updates fetched per `getUpdates` call.
pub const UPDATES_LIMIT: u32 = 100;

/// Why a Bot API call failed.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Network failure or undecodable body.
    #[error("telegram request failed: {0}")]
    Transport(#[from] anyhow::Error),
    /// Non-2xx answer.
    #[error("telegram returned HTTP {status}: {description}")]
    Http {
        /// HTTP status.
        status: u16,
        /// The API's error description.
        description: String,
    },
    /// A 2xx answer whose envelope reports failure or lacks a result.
    #[error("telegram call {method} failed: {description}")]
    Api {
        /// Bot API method.
        method: &'static str,
        /// The API's error description.
        description: String,
    },
}

impl ChatError {
    /// Whether retrying can help: transport errors, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Api { .. } => true,
        }
    }
}

impl From<ChatError> for DeliveryError {
    fn from(e: ChatError) -> Self {
        if e.is_transient() {
            DeliveryError::Transient(e.to_string())
        } else {
            DeliveryError::Rejected(e.to_string())
        }
    }
}

/// Bot API client bound to one bot token.
#[derive(Clone)]
pub struct TelegramClient {
    api: ApiClient,
}

impl TelegramClient {
    /// A client for the bot `token` at `api_url` (normally
    /// `https://api.telegram.org`).
    ///
    /// # Errors
    /// Fails on a malformed URL.
    pub fn new(api_url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = format!("{}/bot{token}/", api_url.trim_end_matches('/'));
        Ok(Self { api: ApiClient::new(&base, timeout)? })
    }

    /// Invokes `method` with `request` and unwraps the envelope.
    pub async fn invoke<Req, Res>(&self, method: &'static str, request: &Req) -> Result<Res, ChatError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        tracing::debug!(method, "Invoking Telegram method");
        let response = self.api.post::<TelegramResult<Res>, Req>(method, request).await?;

        if !response.success {
            let description = response
                .error_body
                .as_deref()
                .and_then(|body| serde_json::from_str::<TelegramResult<serde_json::Value>>(body).ok())
                .and_then(|envelope| envelope.description)
                .unwrap_or_else(|| "no description".to_string());
            tracing::warn!(method, status = response.status, description = %description, "Telegram call failed");
            return Err(ChatError::Http { status: response.status, description });
        }

        match response.data {
            Some(TelegramResult { ok: true, result: Some(result), .. }) => Ok(result),
            Some(envelope) => Err(ChatError::Api {
                method,
                description: envelope.description.unwrap_or_else(|| "missing result".to_string()),
            }),
            None => Err(ChatError::Api { method, description: "empty response".to_string() }),
        }
    }

    /// `sendMessage`.
    pub async fn send_message(&self, message: &OutboundMessage) -> Result<Message, ChatError> {
        tracing::info!(chat_id = %message.chat_id(), chars = message.text().chars().count(), "Sending message");
        let request = SendMessageRequest { chat_id: message.chat_id().0, text: message.text() };
        self.invoke("sendMessage", &request).await
    }

    /// `getUpdates` starting at `offset`, short polling.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, ChatError> {
        let request = GetUpdatesRequest {
            offset,
            limit: UPDATES_LIMIT,
            timeout: 0,
            allowed_updates: vec!["message".to_string()],
        };
        self.invoke("getUpdates", &request).await
    }

    /// `setMyCommands`.
    pub async fn set_my_commands(&self, commands: &[BotCommand]) -> Result<bool, ChatError> {
        self.invoke("setMyCommands", &SetMyCommandsRequest { commands }).await
    }
}

impl Notifier for TelegramClient {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        self.send_message(message).await.map(|_| ()).map_err(DeliveryError::from)
    }
}
