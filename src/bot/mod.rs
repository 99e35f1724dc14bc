//! Stock quote bot.
//!
//! Answers `/stock=<code>` commands. Every lookup ends in a chat reply, even
//! when the quote service is down, slow or returns garbage. Replies go out
//! through the relay like any other message.

mod quote;

pub use quote::{parse_quote, HttpQuoteSource, Quote, QuoteSource, NO_DATA};

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::chat::{ChatMessage, CommandInvocation};
use crate::relay::Relay;
use crate::{RelayError, Result};

/// Reply when the quote service cannot be used.
pub const SERVICE_NOT_AVAILABLE: &str = "Stock service is not available";

/// Stock quote bot.
pub struct StockBot {
    source: Arc<dyn QuoteSource>,
    relay: Relay,
    username: String,
    timeout: Duration,
}

impl StockBot {
    /// Create a bot posting as `username` through `relay`.
    pub fn new(
        source: Arc<dyn QuoteSource>,
        relay: Relay,
        username: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            relay,
            username: username.into(),
            timeout,
        }
    }

    /// Look up a stock code and produce the reply text.
    ///
    /// Never fails: timeouts and service errors become
    /// [`SERVICE_NOT_AVAILABLE`], unreadable responses a generic failure reply.
    pub async fn invoke(&self, code: &str) -> String {
        let body = match tokio::time::timeout(self.timeout, self.source.fetch(code)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!(code, error = %e, "Quote lookup failed");
                return SERVICE_NOT_AVAILABLE.to_string();
            }
            Err(_) => {
                warn!(code, error = %RelayError::QuoteTimeout, "Quote lookup failed");
                return SERVICE_NOT_AVAILABLE.to_string();
            }
        };

        match parse_quote(&body) {
            Ok(Quote::Price(price)) => {
                format!("{} quote is ${} per share", code.to_uppercase(), price)
            }
            Ok(Quote::NoData) => format!("Invalid stock code for command /stock={code}"),
            Err(e) => {
                warn!(code, error = %e, "Unreadable quote response");
                format!("Unable to read stock quote for /stock={code}")
            }
        }
    }

    /// Wrap reply text as a bot message in `room`.
    pub fn reply(&self, room: impl Into<String>, text: impl Into<String>) -> ChatMessage {
        ChatMessage::new(&self.username, text, room)
    }

    /// Answer a command: look the quote up and build the reply for `room`.
    pub async fn answer(&self, command: &CommandInvocation, room: &str) -> ChatMessage {
        let text = self.invoke(&command.code).await;
        info!(room, command = %command.raw.trim(), reply = %text, "Bot answered");
        self.reply(room, text)
    }

    /// Publish a reply to every instance.
    pub async fn publish(&self, reply: &ChatMessage) -> Result<()> {
        self.relay.publish(reply).await
    }
}
