//! Test helpers for integration tests.
//!
//! Provides in-process instances sharing a broker, a canned quote source and
//! a WebSocket test client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use relaychat::bot::QuoteSource;
use relaychat::config::Config;
use relaychat::history::{HistoryStore, MemoryHistory};
use relaychat::relay::MemoryBroker;
use relaychat::web::WebServer;
use relaychat::{ChatHub, ChatMessage, Result, Services};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Quote source answering every code with a fixed opening price.
pub struct CannedQuotes {
    pub price: &'static str,
}

#[async_trait]
impl QuoteSource for CannedQuotes {
    async fn fetch(&self, code: &str) -> Result<String> {
        Ok(format!(
            "Symbol,Date,Time,Open,High,Low,Close,Volume\n{},2024-01-02,22:00:07,{},1,1,1,1\n",
            code.to_uppercase(),
            self.price
        ))
    }
}

/// Test configuration.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.logging.file = String::new();
    config
}

/// Start services on a shared broker and history store.
pub async fn start_services(
    config: &Config,
    broker: Arc<MemoryBroker>,
    store: Arc<dyn HistoryStore>,
) -> Services {
    Services::start(
        config,
        broker,
        store,
        Arc::new(CannedQuotes { price: "150.00" }),
    )
    .await
    .expect("Failed to start services")
}

/// A running instance serving WebSocket clients.
pub struct TestInstance {
    pub services: Services,
    pub addr: SocketAddr,
}

impl TestInstance {
    /// Start an instance with its own broker and history.
    pub async fn start() -> Self {
        Self::start_on(Arc::new(MemoryBroker::new()), Arc::new(MemoryHistory::new())).await
    }

    /// Start an instance on a shared broker and history store.
    pub async fn start_on(broker: Arc<MemoryBroker>, store: Arc<dyn HistoryStore>) -> Self {
        Self::start_with(&test_config(), broker, store).await
    }

    /// Start an instance with a custom configuration.
    pub async fn start_with(
        config: &Config,
        broker: Arc<MemoryBroker>,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        let services = start_services(config, broker, store).await;
        let server =
            WebServer::new(&config.server, services.app_state()).expect("Invalid server config");
        let addr = server.run_with_addr().await.expect("Failed to start server");
        Self { services, addr }
    }

    /// The instance's hub.
    pub fn hub(&self) -> &Arc<ChatHub> {
        self.services.hub()
    }

    /// Connect a client to `room` and wait until the hub has registered it.
    pub async fn connect(&self, room: &str) -> TestClient {
        let before = self.hub().room_connection_count(room).await;
        let client = TestClient::connect(self.addr, room)
            .await
            .expect("Failed to connect");
        wait_for_connections(self.hub(), room, before + 1).await;
        client
    }
}

/// Wait until `room` has exactly `count` connections.
pub async fn wait_for_connections(hub: &ChatHub, room: &str, count: usize) {
    timeout(DEFAULT_TIMEOUT, async {
        while hub.room_connection_count(room).await != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timed out waiting for connections");
}

/// WebSocket test client.
pub struct TestClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect to the chat endpoint for `room`.
    pub async fn connect(
        addr: SocketAddr,
        room: &str,
    ) -> std::result::Result<Self, tokio_tungstenite::tungstenite::Error> {
        let (stream, _) = connect_async(format!("ws://{addr}/websocket/{room}")).await?;
        Ok(Self { stream })
    }

    /// Send a raw text frame.
    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .expect("Failed to send frame");
    }

    /// Send a chat message as `username`.
    pub async fn say(&mut self, username: &str, text: &str) {
        let frame = serde_json::json!({ "username": username, "text": text });
        self.send_raw(&frame.to_string()).await;
    }

    /// Receive the next chat message.
    pub async fn recv(&mut self) -> ChatMessage {
        self.try_recv(DEFAULT_TIMEOUT)
            .await
            .expect("Timed out waiting for a message")
    }

    /// Receive the next chat message, or None if nothing arrives in time.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<ChatMessage> {
        let next = async {
            while let Some(frame) = self.stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        return Some(
                            serde_json::from_str::<ChatMessage>(&text)
                                .expect("Server sent an invalid message"),
                        )
                    }
                    Ok(Message::Close(_)) | Err(_) => return None,
                    Ok(_) => continue,
                }
            }
            None
        };
        timeout(wait, next).await.ok().flatten()
    }

    /// Send a raw text frame, returning false if the transport is gone.
    pub async fn try_send_raw(&mut self, text: &str) -> bool {
        self.stream.send(Message::Text(text.to_string())).await.is_ok()
    }

    /// Read until the server closes the connection. False on timeout.
    pub async fn wait_closed(&mut self, wait: Duration) -> bool {
        let closed = async {
            while let Some(Ok(frame)) = self.stream.next().await {
                if let Message::Close(_) = frame {
                    break;
                }
            }
        };
        timeout(wait, closed).await.is_ok()
    }

    /// Close the connection.
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
