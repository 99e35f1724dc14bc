//! NATS broker.
//!
//! Channels map one-to-one onto NATS subjects. Plain subjects fan out to every
//! subscriber, so each instance sees all traffic.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::info;

use super::{Broker, PayloadStream};
use crate::{RelayError, Result};

/// Broker backed by a NATS server.
///
/// The client is connected once and shared by publishers and consumers.
#[derive(Clone)]
pub struct NatsBroker {
    client: async_nats::Client,
}

impl NatsBroker {
    /// Connect to the NATS server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| RelayError::BrokerUnavailable(format!("failed to connect to {url}: {e}")))?;
        info!(%url, "Connected to NATS");
        Ok(Self { client })
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(channel.to_string(), payload.into())
            .await
            .map_err(|e| RelayError::BrokerUnavailable(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| RelayError::BrokerUnavailable(e.to_string()))
    }

    async fn consume(&self, channel: &str) -> Result<PayloadStream> {
        let subscriber = self
            .client
            .subscribe(channel.to_string())
            .await
            .map_err(|e| RelayError::BrokerUnavailable(e.to_string()))?;

        Ok(subscriber.map(|msg| msg.payload.to_vec()).boxed())
    }
}
