//! In-process broker.
//!
//! Used for single-instance deployments and tests. Several hubs sharing one
//! `MemoryBroker` behave like separate instances sharing a real broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};

use super::{Broker, PayloadStream};
use crate::{RelayError, Result};

/// Messages buffered per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 1024;

/// In-process publish/subscribe broker.
pub struct MemoryBroker {
    /// Channels by name, created on first use.
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    closed: AtomicBool,
}

impl MemoryBroker {
    /// Create a broker with no channels.
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Get or declare a channel.
    ///
    /// Declaration happens under the lock so concurrent callers share one channel.
    async fn channel(&self, name: &str) -> Result<broadcast::Sender<Vec<u8>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::BrokerUnavailable("broker is closed".to_string()));
        }

        let mut channels = self.channels.lock().await;
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(sender.clone())
    }

    /// Simulate losing the broker: open streams end and later calls fail.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.channels.lock().await.clear();
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let sender = self.channel(channel).await?;
        // No subscribers is not an error, same as a real broker
        let _ = sender.send(payload);
        Ok(())
    }

    async fn consume(&self, channel: &str) -> Result<PayloadStream> {
        let receiver = self.channel(channel).await?.subscribe();
        let channel = channel.to_string();

        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(%channel, skipped, "Subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
