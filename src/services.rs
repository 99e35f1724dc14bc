//! Service wiring for one chat instance.
//!
//! Builds the hub, router, bot and relay around the configured backends,
//! starts the broker consumer and the hub dispatcher, and stops them again in
//! order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bot::{HttpQuoteSource, QuoteSource, StockBot};
use crate::chat::{fan_in, run_dispatcher, ChatHub, CommandRouter, HubSender};
use crate::config::Config;
use crate::history::{HistoryStore, RoomHistory, SqliteHistory};
use crate::relay::{Broker, MemoryBroker, NatsBroker, Relay};
use crate::web::{AppState, WebServer};
use crate::Result;

/// Starts shutdown of a running instance.
#[derive(Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    /// Signal shutdown. Queued messages are still dispatched.
    pub fn fire(&self) {
        let _ = self.0.send(true);
    }
}

/// Running services of one instance.
pub struct Services {
    hub: Arc<ChatHub>,
    router: Arc<CommandRouter>,
    /// Keeps the fan-in queue open after losing the broker, so local
    /// connections stay up.
    local: HubSender,
    shutdown: ShutdownTrigger,
    dispatcher: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl Services {
    /// Wire everything up and start the background tasks.
    ///
    /// Fails if the broker subscription cannot be established.
    pub async fn start(
        config: &Config,
        broker: Arc<dyn Broker>,
        store: Arc<dyn HistoryStore>,
        quotes: Arc<dyn QuoteSource>,
    ) -> Result<Self> {
        let history = RoomHistory::new(store);
        let relay = Relay::new(broker, config.broker.channel.clone());
        let (local, queue) = fan_in(config.hub.queue_capacity);
        let hub = Arc::new(ChatHub::new(history.clone(), config.hub.outbound_capacity));
        let bot = Arc::new(StockBot::new(
            quotes,
            relay.clone(),
            config.bot.username.clone(),
            Duration::from_secs(config.bot.timeout_secs),
        ));

        let stream = relay.subscribe().await?;

        let (sender, signal) = watch::channel(false);
        let consumer = tokio::spawn(relay.clone().run_consumer(stream, local.clone()));
        let dispatcher = tokio::spawn(run_dispatcher(hub.clone(), queue, signal));
        let router = Arc::new(CommandRouter::new(history, relay, bot));

        info!(
            channel = %config.broker.channel,
            queue_capacity = config.hub.queue_capacity,
            "Chat services started"
        );

        Ok(Self {
            hub,
            router,
            local,
            shutdown: ShutdownTrigger(Arc::new(sender)),
            dispatcher,
            consumer,
        })
    }

    /// State for the web handlers.
    pub fn app_state(&self) -> AppState {
        AppState {
            hub: self.hub.clone(),
            router: self.router.clone(),
        }
    }

    /// The connection hub.
    pub fn hub(&self) -> &Arc<ChatHub> {
        &self.hub
    }

    /// Handle that can start shutdown from elsewhere.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }

    /// Stop consuming, drain the hub queue and close every connection.
    pub async fn shutdown(self) {
        self.consumer.abort();
        drop(self.local);
        self.shutdown.fire();
        if let Err(e) = self.dispatcher.await {
            error!(error = %e, "Dispatcher task failed");
        }
        info!("Chat services stopped");
    }
}

/// Run an instance with the configured backends until Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    let store = Arc::new(SqliteHistory::open(&config.history.path).await?);
    info!(path = %config.history.path, "Room history opened");

    let broker: Arc<dyn Broker> = if config.broker.is_memory() {
        info!("Using in-process broker");
        Arc::new(MemoryBroker::new())
    } else {
        Arc::new(NatsBroker::connect(&config.broker.url).await?)
    };

    let quotes = Arc::new(HttpQuoteSource::new(
        config.bot.quote_url.clone(),
        Duration::from_secs(config.bot.timeout_secs),
    )?);

    let services = Services::start(&config, broker, store, quotes).await?;
    let server = WebServer::new(&config.server, services.app_state())?;

    let trigger = services.shutdown_trigger();
    let served = server
        .run(async move {
            shutdown_signal().await;
            trigger.fire();
        })
        .await;

    services.shutdown().await;
    served
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;
    use crate::history::MemoryHistory;
    use async_trait::async_trait;

    struct NoQuotes;

    #[async_trait]
    impl QuoteSource for NoQuotes {
        async fn fetch(&self, _code: &str) -> Result<String> {
            Ok("Symbol,Date,Time,Open\nX,N/D,N/D,N/D\n".to_string())
        }
    }

    async fn start() -> Services {
        Services::start(
            &Config::default(),
            Arc::new(MemoryBroker::new()),
            Arc::new(MemoryHistory::new()),
            Arc::new(NoQuotes),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_chat_round_trips_through_broker() {
        let services = start().await;
        let mut joined = services.hub().join("general").await.unwrap();

        let msg = ChatMessage::new("alice", "hello", "general");
        services.app_state().router.route(msg.clone()).await.unwrap();

        assert_eq!(joined.recv().await.unwrap(), msg);
        services.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let services = start().await;
        let mut joined = services.hub().join("general").await.unwrap();
        let hub = services.hub().clone();

        services.shutdown().await;

        assert!(joined.recv().await.is_none());
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_connections_survive_broker_loss() {
        let broker = Arc::new(MemoryBroker::new());
        let services = Services::start(
            &Config::default(),
            broker.clone(),
            Arc::new(MemoryHistory::new()),
            Arc::new(NoQuotes),
        )
        .await
        .unwrap();
        let mut joined = services.hub().join("general").await.unwrap();

        broker.close().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(services.hub().connection_count().await, 1);
        assert!(joined.try_recv().is_err());
        services.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_fails_when_broker_is_closed() {
        let broker = Arc::new(MemoryBroker::new());
        broker.close().await;

        let result = Services::start(
            &Config::default(),
            broker,
            Arc::new(MemoryHistory::new()),
            Arc::new(NoQuotes),
        )
        .await;
        assert!(result.is_err());
    }
}
