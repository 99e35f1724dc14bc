//! Chat command classification.
//!
//! Decides whether an inbound message is ordinary chat or a directive for the
//! stock bot. Only one command exists: `/stock=<code>` (case-sensitive).

/// Literal prefix of the stock quote command.
pub const STOCK_COMMAND_PREFIX: &str = "/stock=";

/// Command word without the argument separator.
const STOCK_COMMAND_WORD: &str = "/stock";

/// Usage hint sent back for malformed commands.
pub const STOCK_COMMAND_USAGE: &str = "Invalid command format, use /stock=<code>";

/// A recognized bot command and its parsed argument.
///
/// Derived from a chat message and discarded once the bot has answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// The message text as received.
    pub raw: String,
    /// Stock code argument, as typed.
    pub code: String,
}

/// Result of classifying a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    /// Ordinary chat.
    Plain,
    /// Stock quote request.
    Stock(CommandInvocation),
}

/// A command that was recognized but cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// `/stock=` with nothing after it, or `/stock` without `=`.
    MissingStockCode,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::MissingStockCode => write!(f, "missing stock code"),
        }
    }
}

impl std::error::Error for CommandError {}

/// Classify a message text.
pub fn classify(text: &str) -> Result<ChatInput, CommandError> {
    let trimmed = text.trim();

    if let Some(rest) = trimmed.strip_prefix(STOCK_COMMAND_PREFIX) {
        let code = rest.split_whitespace().next().unwrap_or("");
        if code.is_empty() {
            return Err(CommandError::MissingStockCode);
        }
        return Ok(ChatInput::Stock(CommandInvocation {
            raw: text.to_string(),
            code: code.to_string(),
        }));
    }

    // "/stock" or "/stock aapl.us": the command word without its separator
    if trimmed.split_whitespace().next() == Some(STOCK_COMMAND_WORD) {
        return Err(CommandError::MissingStockCode);
    }

    Ok(ChatInput::Plain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(code: &str, raw: &str) -> Result<ChatInput, CommandError> {
        Ok(ChatInput::Stock(CommandInvocation {
            raw: raw.to_string(),
            code: code.to_string(),
        }))
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(classify("hello"), Ok(ChatInput::Plain));
        assert_eq!(classify(""), Ok(ChatInput::Plain));
        assert_eq!(classify("/me waves"), Ok(ChatInput::Plain));
    }

    #[test]
    fn test_stock_command() {
        assert_eq!(classify("/stock=aapl.us"), stock("aapl.us", "/stock=aapl.us"));
    }

    #[test]
    fn test_stock_command_surrounding_whitespace() {
        assert_eq!(
            classify("  /stock=msft.us  "),
            stock("msft.us", "  /stock=msft.us  ")
        );
    }

    #[test]
    fn test_stock_command_trailing_words_ignored() {
        assert_eq!(
            classify("/stock=aapl.us please"),
            stock("aapl.us", "/stock=aapl.us please")
        );
    }

    #[test]
    fn test_stock_command_is_case_sensitive() {
        assert_eq!(classify("/STOCK=aapl.us"), Ok(ChatInput::Plain));
        assert_eq!(classify("/Stock=aapl.us"), Ok(ChatInput::Plain));
    }

    #[test]
    fn test_prefix_must_lead() {
        assert_eq!(classify("try /stock=aapl.us"), Ok(ChatInput::Plain));
    }

    #[test]
    fn test_missing_code() {
        assert_eq!(classify("/stock="), Err(CommandError::MissingStockCode));
        assert_eq!(classify("/stock=   "), Err(CommandError::MissingStockCode));
    }

    #[test]
    fn test_missing_separator() {
        assert_eq!(classify("/stock"), Err(CommandError::MissingStockCode));
        assert_eq!(classify("/stock aapl.us"), Err(CommandError::MissingStockCode));
    }

    #[test]
    fn test_similar_words_are_plain() {
        assert_eq!(classify("/stocks"), Ok(ChatInput::Plain));
        assert_eq!(classify("/stockpile=1"), Ok(ChatInput::Plain));
    }
}
