//! Relay module - forwards Telegram messages to a chat completion provider.

pub mod commands;
pub mod completion;
pub mod database;
pub mod dispatch;
pub mod engine;
pub mod registrar;
pub mod telegram;
pub mod turn;
pub mod webhook;


pub use completion::{CompletionClient, CompletionConfig};
pub use database::{ConversationStore, StoreError};
pub use engine::{Relay, RelaySettings};
pub use telegram::{ChatTransport, TelegramClient, TextFormat, TransportError};
pub use turn::{ConversationTurn, InboundEvent, Role};
