//! Broker-backed relay between server instances.
//!
//! Every instance publishes accepted chat traffic to one broker channel and
//! consumes the same channel, re-broadcasting whatever arrives to its local
//! connections. Bot replies travel the same path as user messages.

mod memory;
mod nats;

pub use memory::MemoryBroker;
pub use nats::NatsBroker;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::chat::{ChatMessage, HubSender};
use crate::Result;

/// Stream of raw payloads from one broker channel.
pub type PayloadStream = BoxStream<'static, Vec<u8>>;

/// Publish/subscribe broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload to a named channel.
    ///
    /// Best effort: a connectivity failure is reported as
    /// [`RelayError::BrokerUnavailable`](crate::RelayError::BrokerUnavailable)
    /// and the payload is not retried.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Open a long-lived subscription to a channel.
    ///
    /// The stream preserves per-channel order and ends when the broker
    /// connection is lost. It is not resubscribed automatically.
    async fn consume(&self, channel: &str) -> Result<PayloadStream>;
}

/// Typed relay over a [`Broker`] and its client-traffic channel.
#[derive(Clone)]
pub struct Relay {
    broker: Arc<dyn Broker>,
    channel: String,
}

impl Relay {
    /// Create a relay publishing to and consuming from `channel`.
    pub fn new(broker: Arc<dyn Broker>, channel: impl Into<String>) -> Self {
        Self {
            broker,
            channel: channel.into(),
        }
    }

    /// Channel name used for chat traffic.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish a message for every instance to broadcast.
    pub async fn publish(&self, msg: &ChatMessage) -> Result<()> {
        let payload = msg.to_bytes()?;
        self.broker.publish(&self.channel, payload).await?;
        debug!(channel = %self.channel, room = %msg.room, "Published message");
        Ok(())
    }

    /// Subscribe to the chat channel.
    pub async fn subscribe(&self) -> Result<PayloadStream> {
        let stream = self.broker.consume(&self.channel).await?;
        info!(channel = %self.channel, "Subscribed to broker channel");
        Ok(stream)
    }

    /// Feed consumed messages into the hub until the subscription ends.
    ///
    /// Undecodable payloads are dropped. Returns when the stream ends or the
    /// hub stops accepting messages.
    pub async fn run_consumer(self, mut stream: PayloadStream, hub: HubSender) {
        while let Some(payload) = stream.next().await {
            let msg = match ChatMessage::from_bytes(&payload) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(channel = %self.channel, error = %e, "Dropping undecodable broker payload");
                    continue;
                }
            };

            if hub.submit(msg).await.is_err() {
                debug!(channel = %self.channel, "Hub closed, stopping consumer");
                return;
            }
        }

        error!(channel = %self.channel, "Broker subscription ended");
    }
}
