//! Real-time chat distribution.
//!
//! This module provides:
//! - The chat message envelope
//! - Detection of bot commands in chat text
//! - The connection hub with per-room broadcast and history replay
//! - Routing of inbound messages to history, relay and bot

mod command;
mod hub;
mod message;
mod router;

pub use command::{
    classify, ChatInput, CommandError, CommandInvocation, STOCK_COMMAND_PREFIX,
    STOCK_COMMAND_USAGE,
};
pub use hub::{
    fan_in, run_dispatcher, ChatHub, ConnectionId, DispatchReport, HubSender, JoinedConnection,
    RemovalSignal,
};
pub use message::ChatMessage;
pub use router::{CommandRouter, Routed};
