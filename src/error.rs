//! Error types for relaychat.

use thiserror::Error;

/// Common error type for relaychat.
///
/// Steady-state variants (`Decode`, `Write`, `BrokerUnavailable`,
/// `QuoteService`, `QuoteTimeout`, `Parse`, `MalformedCommand`) are isolated to
/// one connection or one message. Only setup failures stop the process.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Connection could not be registered with the hub.
    #[error("registration error: {0}")]
    Registration(String),

    /// Inbound frame or broker payload could not be decoded.
    #[error("decode failure: {0}")]
    Decode(String),

    /// Writing to a specific connection failed.
    #[error("write failure on connection {connection}: {reason}")]
    Write {
        /// Connection that failed.
        connection: u64,
        /// What went wrong.
        reason: String,
    },

    /// The message broker could not be reached.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The quote service returned an error or a non-success status.
    #[error("quote service error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    QuoteService {
        /// HTTP status, when the service answered at all.
        status: Option<u16>,
        /// Error details.
        message: String,
    },

    /// The quote service did not answer in time.
    #[error("quote service timed out")]
    QuoteTimeout,

    /// The quote response could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// The hub has stopped accepting messages.
    #[error("hub is shut down")]
    HubClosed,

    /// A bot command was recognized but is incomplete.
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for RelayError {
    fn from(e: sqlx::Error) -> Self {
        RelayError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Decode(e.to_string())
    }
}

/// Result type alias for relaychat operations.
pub type Result<T> = std::result::Result<T, RelayError>;
