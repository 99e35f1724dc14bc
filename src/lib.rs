//! relaychat - real-time chat relay.
//!
//! Browser clients connect over WebSocket to a room. Chat messages are stored
//! per room, published to a message broker and broadcast by every instance
//! subscribed to it. `/stock=<code>` commands are answered by a quote bot.

pub mod bot;
pub mod chat;
pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod relay;
pub mod services;
pub mod web;

pub use bot::StockBot;
pub use chat::{ChatHub, ChatMessage, CommandRouter};
pub use config::Config;
pub use error::{RelayError, Result};
pub use relay::Relay;
pub use services::Services;
