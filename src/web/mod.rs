//! Web surface: the chat WebSocket endpoint and a health check.

mod router;
mod server;
mod socket;

use std::sync::Arc;

use crate::chat::{ChatHub, CommandRouter};

pub use router::{create_health_router, create_router};
pub use server::WebServer;
pub use socket::websocket_handler;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Connection hub of this instance.
    pub hub: Arc<ChatHub>,
    /// Inbound message router.
    pub router: Arc<CommandRouter>,
}
