//! WebSocket text protocol.
//!
//! Inbound frames are plain-text commands:
//!
//! ```text
//! SUBSCRIBE:<symbol>
//! UNSUBSCRIBE:<symbol>
//! ```
//!
//! Outbound frames are either literal acknowledgement strings, a JSON
//! rendering of a [`Snapshot`], or `Error: <cause>`.

use crate::error::GatewayError;
use external_services::InstrumentQuote;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Instrument identifier.
pub type Symbol = String;

pub const SUBSCRIBE_PREFIX: &str = "SUBSCRIBE:";
pub const UNSUBSCRIBE_PREFIX: &str = "UNSUBSCRIBE:";
pub const INVALID_COMMAND_REPLY: &str =
    "Invalid command. Use SUBSCRIBE:symbol or UNSUBSCRIBE:symbol";

// ============================================================================
// Client → Server
// ============================================================================

/// Command sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Subscribe(Symbol),
    Unsubscribe(Symbol),
}

impl ClientCommand {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Subscribe(symbol) | Self::Unsubscribe(symbol) => symbol,
        }
    }
}

impl FromStr for ClientCommand {
    type Err = GatewayError;

    fn from_str(payload: &str) -> Result<Self, Self::Err> {
        let (symbol, subscribe) = if let Some(rest) = payload.strip_prefix(SUBSCRIBE_PREFIX) {
            (rest, true)
        } else if let Some(rest) = payload.strip_prefix(UNSUBSCRIBE_PREFIX) {
            (rest, false)
        } else {
            return Err(GatewayError::MalformedCommand(payload.to_string()));
        };

        let symbol = symbol.trim();
        if !is_valid_symbol(symbol) {
            return Err(GatewayError::MalformedCommand(payload.to_string()));
        }

        Ok(if subscribe {
            Self::Subscribe(symbol.to_string())
        } else {
            Self::Unsubscribe(symbol.to_string())
        })
    }
}

/// A symbol ends up as one path segment of an upstream URL, so anything that
/// could change the path or query is refused.
fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol != "."
        && symbol != ".."
        && !symbol.chars().any(|c| {
            c.is_whitespace() || c.is_control() || matches!(c, '/' | '\\' | '?' | '#' | '%')
        })
}

// ============================================================================
// Server → Client
// ============================================================================

/// One immutable price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: Symbol,
    pub price: f64,
    /// Observation time in epoch milliseconds.
    pub timestamp: i64,
}

impl Snapshot {
    pub fn new(symbol: impl Into<Symbol>, price: f64, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
        }
    }

    /// Wire rendering of this snapshot.
    pub fn render(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<InstrumentQuote> for Snapshot {
    fn from(quote: InstrumentQuote) -> Self {
        Self {
            symbol: quote.symbol,
            price: quote.price,
            timestamp: quote.timestamp,
        }
    }
}

/// Non-data frame sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Subscribed(Symbol),
    Unsubscribed(Symbol),
    InvalidCommand,
    Error(String),
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribed(symbol) => write!(f, "Subscribed to {}", symbol),
            Self::Unsubscribed(symbol) => write!(f, "Unsubscribed from {}", symbol),
            Self::InvalidCommand => f.write_str(INVALID_COMMAND_REPLY),
            Self::Error(cause) => write!(f, "Error: {}", cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe() {
        let cmd: ClientCommand = "SUBSCRIBE:AAPL".parse().unwrap();
        assert_eq!(cmd, ClientCommand::Subscribe("AAPL".to_string()));
    }

    #[test]
    fn test_parse_trims_symbol() {
        let cmd: ClientCommand = "UNSUBSCRIBE:  MSFT \n".parse().unwrap();
        assert_eq!(cmd, ClientCommand::Unsubscribe("MSFT".to_string()));
        assert_eq!(cmd.symbol(), "MSFT");
    }

    #[test]
    fn test_parse_rejects_unknown_payloads() {
        let payloads = [
            "",
            "hello",
            "subscribe:AAPL",
            "SUBSCRIBE",
            "SUBSCRIBE:",
            "UNSUBSCRIBE:   ",
        ];
        for payload in payloads {
            assert!(
                matches!(
                    payload.parse::<ClientCommand>(),
                    Err(GatewayError::MalformedCommand(_))
                ),
                "payload {payload:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_rejects_path_like_symbols() {
        for payload in [
            "SUBSCRIBE:../../admin",
            "SUBSCRIBE:..",
            "SUBSCRIBE:A/B",
            "SUBSCRIBE:A\\B",
            "SUBSCRIBE:AAPL?x=1",
            "SUBSCRIBE:AAPL#frag",
            "SUBSCRIBE:%2e%2e",
            "UNSUBSCRIBE:BRK B",
        ] {
            assert!(
                payload.parse::<ClientCommand>().is_err(),
                "payload {payload:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_accepts_punctuated_symbols() {
        for symbol in ["BRK.B", "^GSPC", "EUR-USD", "ES=F"] {
            let cmd: ClientCommand = format!("SUBSCRIBE:{symbol}").parse().unwrap();
            assert_eq!(cmd.symbol(), symbol);
        }
    }

    #[test]
    fn test_server_messages() {
        assert_eq!(
            ServerMessage::Subscribed("AAPL".into()).to_string(),
            "Subscribed to AAPL"
        );
        assert_eq!(
            ServerMessage::Unsubscribed("AAPL".into()).to_string(),
            "Unsubscribed from AAPL"
        );
        assert_eq!(
            ServerMessage::InvalidCommand.to_string(),
            "Invalid command. Use SUBSCRIBE:symbol or UNSUBSCRIBE:symbol"
        );
        assert_eq!(
            ServerMessage::Error("upstream down".into()).to_string(),
            "Error: upstream down"
        );
    }

    #[test]
    fn test_snapshot_rendering() {
        let text = Snapshot::new("AAPL", 150.25, 1_700_000_000_000).render().unwrap();
        assert_eq!(
            text,
            r#"{"symbol":"AAPL","price":150.25,"timestamp":1700000000000}"#
        );
    }

    #[test]
    fn test_snapshot_from_quote() {
        let snapshot = Snapshot::from(InstrumentQuote {
            symbol: "MSFT".to_string(),
            price: 410.5,
            timestamp: 42,
        });
        assert_eq!(snapshot, Snapshot::new("MSFT", 410.5, 42));
    }
}
