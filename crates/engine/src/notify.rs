//! Operator notifications.
//!
//! Delivery is best effort: a failed send is logged and dropped so a chat
//! outage never affects a running batch.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Build the notifier for the configured credentials.
///
/// Telegram is used when both the bot token and chat id are present,
/// otherwise messages only go to the log.
pub fn from_config(config: &vidbatch_config::NotifyConfig) -> Arc<dyn Notifier> {
    match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty() => {
            Arc::new(TelegramNotifier::new(token.clone(), chat.clone()))
        }
        _ => Arc::new(LogNotifier),
    }
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        info!(target: "vidbatch::notify", "{}", message);
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends notifications through the Telegram Bot API.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    token: String,
    chat_id: String,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Self {
        Self::with_api_base(token, chat_id, TELEGRAM_API_BASE.to_string())
    }

    pub fn with_api_base(token: String, chat_id: String, api_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            chat_id,
            api_base,
        }
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }

    /// Post `message`. The returned error carries no URL, since the URL
    /// contains the bot token.
    async fn send(&self, message: &str) -> Result<(), reqwest::Error> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: message,
        };
        self.client
            .post(self.send_message_url())
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| e.without_url())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) {
        if let Err(e) = self.send(message).await {
            warn!(error = %e, "Failed to deliver Telegram notification");
        }
    }
}

/// Collects messages in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
    }
}
