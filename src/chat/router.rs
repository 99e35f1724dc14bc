//! Routing of inbound chat messages.
//!
//! Plain chat is stored in the room history and published to the relay; every
//! instance, this one included, broadcasts it when it comes back from the
//! broker. Stock commands go to the bot instead and are never broadcast.
//!
//! A message the broker refuses is dropped. The failure is logged and the
//! connection carries on.

use std::sync::Arc;

use tracing::{debug, error};

use super::command::{classify, ChatInput, STOCK_COMMAND_USAGE};
use super::message::ChatMessage;
use crate::bot::StockBot;
use crate::history::RoomHistory;
use crate::relay::Relay;
use crate::{RelayError, Result};

/// What happened to a routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Stored and sent for broadcast.
    Chat,
    /// Answered by the bot; the reply was sent for broadcast.
    Command,
    /// Blank text, dropped.
    Ignored,
}

/// Routes inbound messages to history, relay and bot.
pub struct CommandRouter {
    history: RoomHistory,
    relay: Relay,
    bot: Arc<StockBot>,
}

impl CommandRouter {
    /// Create a router.
    pub fn new(history: RoomHistory, relay: Relay, bot: Arc<StockBot>) -> Self {
        Self {
            history,
            relay,
            bot,
        }
    }

    /// Route one inbound message.
    ///
    /// Returns [`RelayError::MalformedCommand`] for a stock command without a
    /// code; nothing is stored or broadcast in that case.
    pub async fn route(&self, msg: ChatMessage) -> Result<Routed> {
        if msg.is_blank() {
            debug!(room = %msg.room, "Ignoring blank message");
            return Ok(Routed::Ignored);
        }

        match classify(&msg.text) {
            Ok(ChatInput::Plain) => {
                if let Err(e) = self.history.append(&msg).await {
                    error!(room = %msg.room, error = %e, "Failed to store message");
                }
                let published = self.relay.publish(&msg).await;
                self.log_publish_failure(&msg, published);
                Ok(Routed::Chat)
            }
            Ok(ChatInput::Stock(command)) => {
                let reply = self.bot.answer(&command, &msg.room).await;
                let published = self.bot.publish(&reply).await;
                self.log_publish_failure(&reply, published);
                Ok(Routed::Command)
            }
            Err(e) => Err(RelayError::MalformedCommand(format!("{e}: {}", msg.text))),
        }
    }

    /// Private notice explaining command syntax, from the bot.
    pub fn usage_notice(&self, room: &str) -> ChatMessage {
        self.bot.reply(room, STOCK_COMMAND_USAGE)
    }

    fn log_publish_failure(&self, msg: &ChatMessage, published: Result<()>) {
        if let Err(e) = published {
            error!(
                channel = %self.relay.channel(),
                room = %msg.room,
                error = %e,
                "Publish failed, message dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;

    use crate::bot::QuoteSource;
    use crate::history::MemoryHistory;
    use crate::relay::{MemoryBroker, PayloadStream};

    struct FixedQuote;

    #[async_trait]
    impl QuoteSource for FixedQuote {
        async fn fetch(&self, _code: &str) -> Result<String> {
            Ok("Symbol,Date,Time,Open\nAAPL.US,2024-01-02,22:00:07,150.00\n".to_string())
        }
    }

    struct Fixture {
        router: CommandRouter,
        history: RoomHistory,
        broker: Arc<MemoryBroker>,
        stream: PayloadStream,
    }

    async fn fixture() -> Fixture {
        let history = RoomHistory::new(Arc::new(MemoryHistory::new()));
        let broker = Arc::new(MemoryBroker::new());
        let relay = Relay::new(broker.clone(), "chat-channel");
        let stream = relay.subscribe().await.unwrap();
        let bot = Arc::new(StockBot::new(
            Arc::new(FixedQuote),
            relay.clone(),
            "Bot",
            Duration::from_secs(1),
        ));
        Fixture {
            router: CommandRouter::new(history.clone(), relay, bot),
            history,
            broker,
            stream,
        }
    }

    async fn next_message(stream: &mut PayloadStream) -> ChatMessage {
        ChatMessage::from_bytes(&stream.next().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_plain_chat_is_stored_and_published() {
        let mut f = fixture().await;
        let msg = ChatMessage::new("a", "hi", "general");

        assert_eq!(f.router.route(msg.clone()).await.unwrap(), Routed::Chat);
        assert_eq!(next_message(&mut f.stream).await, msg);
        assert_eq!(f.history.load("general").await.unwrap(), vec![msg]);
    }

    #[tokio::test]
    async fn test_stock_command_publishes_bot_reply_only() {
        let mut f = fixture().await;
        let msg = ChatMessage::new("a", "/stock=aapl.us", "general");

        assert_eq!(f.router.route(msg).await.unwrap(), Routed::Command);

        let reply = next_message(&mut f.stream).await;
        assert_eq!(reply.username, "Bot");
        assert_eq!(reply.room, "general");
        assert_eq!(reply.text, "AAPL.US quote is $150.00 per share");
        assert!(f.history.load("general").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_command_is_rejected() {
        let f = fixture().await;
        let result = f.router.route(ChatMessage::new("a", "/stock=", "general")).await;

        assert!(matches!(result, Err(RelayError::MalformedCommand(_))));
        assert!(f.history.load("general").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_message_ignored() {
        let f = fixture().await;
        let result = f.router.route(ChatMessage::new("a", "   ", "general")).await;

        assert_eq!(result.unwrap(), Routed::Ignored);
        assert!(f.history.load("general").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broker_down_still_stores_message() {
        let mut f = fixture().await;
        f.broker.close().await;

        let msg = ChatMessage::new("a", "still here", "general");
        assert_eq!(f.router.route(msg.clone()).await.unwrap(), Routed::Chat);

        // Closing the broker ended the subscription; nothing was published
        assert!(f.stream.next().await.is_none());
        assert_eq!(f.history.load("general").await.unwrap(), vec![msg]);
    }

    #[tokio::test]
    async fn test_broker_down_command_is_still_answered() {
        let f = fixture().await;
        f.broker.close().await;

        let result = f.router.route(ChatMessage::new("a", "/stock=aapl.us", "general")).await;
        assert_eq!(result.unwrap(), Routed::Command);
    }

    #[tokio::test]
    async fn test_usage_notice_comes_from_bot() {
        let f = fixture().await;
        let notice = f.router.usage_notice("general");
        assert_eq!(notice.username, "Bot");
        assert_eq!(notice.text, STOCK_COMMAND_USAGE);
        assert_eq!(notice.room, "general");
    }
}
