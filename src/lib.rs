//! BOOAI - relays Telegram messages to a chat completion provider and keeps
//! a log of every conversation turn.

pub mod config;
pub mod logging;
pub mod relay;
pub mod telegram_log;
