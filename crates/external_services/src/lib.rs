//! Upstream API clients for the price gateway.
//!
//! The gateway never talks to market data vendors directly. Every upstream
//! call goes through a client in this crate so that the wire format stays out
//! of the fan-out engine.
//!
//! # Example
//!
//! ```ignore
//! use external_services::QuoteApiClient;
//!
//! let client = QuoteApiClient::with_base_url("http://localhost:8080/api/instruments");
//! let quote = client.fetch_quote("AAPL").await?;
//! println!("{} @ {}", quote.symbol, quote.price);
//! ```

pub mod error;
pub mod quotes;

pub use error::{Error, Result};
pub use quotes::{InstrumentQuote, QuoteApiClient, DEFAULT_QUOTE_API_URL};
