//! Stock quote retrieval and parsing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::{RelayError, Result};

/// Query suffix requesting a CSV row with a header line.
const QUERY_SUFFIX: &str = "&f=sd2t2ohlcv&h&e=csv";

/// Cell value meaning the service has no data for the code.
pub const NO_DATA: &str = "N/D";

/// Row holding the latest quote (the first row is the header).
const QUOTE_ROW: usize = 1;

/// Column holding the latest price.
const PRICE_COLUMN: usize = 3;

/// User agent string for quote requests.
const USER_AGENT: &str = "relaychat-stockbot/1.0";

/// A parsed quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quote {
    /// Latest price, as printed by the service.
    Price(String),
    /// The service knows nothing about the code.
    NoData,
}

/// Source of raw quote responses.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch the raw tabular response for a stock code.
    async fn fetch(&self, code: &str) -> Result<String>;
}

/// Quote source calling the HTTP quote service.
pub struct HttpQuoteSource {
    client: Client,
    base_url: String,
}

impl HttpQuoteSource {
    /// Create a source for `base_url` whose requests give up after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Request URL for a stock code.
    pub fn url_for(&self, code: &str) -> String {
        format!(
            "{}?s={}{}",
            self.base_url,
            urlencoding::encode(code),
            QUERY_SUFFIX
        )
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn fetch(&self, code: &str) -> Result<String> {
        let url = self.url_for(code);
        tracing::debug!(%url, "Requesting stock quote");

        let response = self.client.get(&url).send().await.map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::QuoteService {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        response.text().await.map_err(map_request_error)
    }
}

fn map_request_error(e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::QuoteTimeout
    } else {
        RelayError::QuoteService {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Extract the latest price from a quote response.
///
/// Rows are lines; cells are separated by `;` or `,`.
pub fn parse_quote(body: &str) -> Result<Quote> {
    let row = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .nth(QUOTE_ROW)
        .ok_or_else(|| RelayError::Parse("quote response has no data row".to_string()))?;

    let price = row
        .split([';', ','])
        .nth(PRICE_COLUMN)
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .ok_or_else(|| RelayError::Parse(format!("quote row has no price column: {row}")))?;

    if price == NO_DATA {
        Ok(Quote::NoData)
    } else {
        Ok(Quote::Price(price.to_string()))
    }
}
