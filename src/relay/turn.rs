//! Conversation turns and inbound events.

use chrono::{DateTime, Utc};

use crate::relay::commands::{self, Route};

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One stored message of a conversation. Never updated once appended.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub chat_id: String,
    /// Sender of the turn; `None` for bot-authored turns.
    pub user_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(chat_id: i64, user_id: Option<i64>, content: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            user_id: user_id.map(|id| id.to_string()),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(chat_id: i64, content: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            user_id: None,
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A message extracted from a webhook update. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    /// Message text; empty for non-text messages such as photos.
    pub text: String,
    /// Routing decision, made once when the event is built. Carries the
    /// `is_command` flag.
    pub route: Route,
}

impl InboundEvent {
    pub fn new(chat_id: i64, sender_id: Option<i64>, text: impl Into<String>) -> Self {
        let text = text.into();
        let route = commands::route(&text);
        Self {
            chat_id,
            sender_id,
            text,
            route,
        }
    }
}
