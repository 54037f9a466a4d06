/**
 * Telegram Bot API over HTTP: the production
 *  `Transport` plus the chat operations the
 *  dispatcher needs.
 */
mod client;
pub mod types;

pub use client::{classify, BotClient, BotClientError};
