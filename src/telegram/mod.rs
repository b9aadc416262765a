// Telegram Bot API: wire types and the HTTP client used for polling, replies and downloads

pub mod client;
pub mod types;

pub use client::TelegramClient;
pub use types::{parse_command, Command, Message, Update};
