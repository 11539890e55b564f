//! Instrument quote REST API client.

use crate::error::{Error, Result};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default base URL of the mock instrument data API.
pub const DEFAULT_QUOTE_API_URL: &str = "http://localhost:8080/api/instruments";

/// One price observation as returned by the quote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentQuote {
    pub symbol: String,
    pub price: f64,
    /// Observation time in epoch milliseconds.
    #[serde(rename = "timeStamp")]
    pub timestamp: i64,
}

/// Quote API client.
///
/// Resolves `GET {base_url}/{symbol}` to an [`InstrumentQuote`]. Cheap to
/// clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct QuoteApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for QuoteApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteApiClient {
    /// Create a new client pointed at [`DEFAULT_QUOTE_API_URL`].
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_QUOTE_API_URL)
    }

    /// Create a new client with a custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url)
    }

    /// Create a new client reusing an existing HTTP client.
    pub fn with_http_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the latest quote for `symbol`.
    pub async fn fetch_quote(&self, symbol: &str) -> Result<InstrumentQuote> {
        let url = self.quote_url(symbol)?;
        debug!("Fetching quote from: {}", url);

        let response = self.http.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(Error::InstrumentNotFound(symbol.to_string()));
        }
        if !status.is_success() {
            return Err(Error::Api(format!(
                "API returned status {}: {}",
                status,
                response.text().await.unwrap_or_default()
            )));
        }

        let body = response.bytes().await?;
        let quote: InstrumentQuote = serde_json::from_slice(&body)?;
        Ok(quote)
    }

    /// `{base_url}/{symbol}` with the symbol percent-encoded as exactly one
    /// path segment.
    fn quote_url(&self, symbol: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .push(symbol);
        Ok(url)
    }
}
