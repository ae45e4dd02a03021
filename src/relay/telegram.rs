//! Outbound transport to the chat platform.

use std::fmt;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{info, warn};

/// Telegram rejects messages longer than this many UTF-16 code units.
pub const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TransportError {}

/// What the relay needs from the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send one message. `text` must already fit in [`MAX_MESSAGE_LEN`].
    async fn send_message(&self, chat_id: i64, text: &str, format: TextFormat) -> Result<(), TransportError>;

    /// Tell the platform where to deliver updates.
    async fn set_webhook(&self, url: &str) -> Result<(), TransportError>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str, format: TextFormat) -> Result<(), TransportError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if format == TextFormat::Html {
            request = request.parse_mode(ParseMode::Html);
        }
        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            TransportError(msg)
        })
    }

    async fn set_webhook(&self, url: &str) -> Result<(), TransportError> {
        let url = reqwest::Url::parse(url).map_err(|e| TransportError(format!("invalid webhook url '{url}': {e}")))?;
        info!("Setting webhook to {}", url);
        self.bot
            .set_webhook(url)
            .await
            .map(|_| ())
            .map_err(|e| TransportError(format!("Failed to set webhook: {e}")))
    }
}

/// Split text into chunks of at most `max_units` UTF-16 code units,
/// preferring to break after a newline. Never splits inside a character.
pub fn split_message(text: &str, max_units: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while utf16_len(rest) > max_units {
        let limit = match utf16_boundary(rest, max_units) {
            // A single character wider than the limit goes out on its own.
            0 => rest.chars().next().map_or(rest.len(), char::len_utf8),
            limit => limit,
        };
        let cut = match rest[..limit].rfind('\n') {
            Some(nl) if nl > 0 => nl + 1,
            _ => limit,
        };
        chunks.push(&rest[..cut]);
        rest = &rest[cut..];
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}

pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// Byte offset of the longest prefix of `text` within `max_units` UTF-16 code units.
fn utf16_boundary(text: &str, max_units: usize) -> usize {
    let mut units = 0;
    for (i, c) in text.char_indices() {
        units += c.len_utf16();
        if units > max_units {
            return i;
        }
    }
    text.len()
}
