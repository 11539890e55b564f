//! Price gateway: authenticated real-time instrument prices over WebSocket.
//!
//! This service:
//! - Validates handshake tokens through a bounded, TTL-aware LRU cache
//! - Tracks each user's subscribed symbols independently of their sessions
//! - Polls each subscribed symbol once per tick, however many sessions watch it
//! - Caches the latest value of popular symbols for immediate replay
//! - Fans every tick out to the attached sessions without letting one slow
//!   client hold up the rest
//!
//! ## Architecture
//!
//! ```text
//! client ──token──▶ TokenValidationCache ──miss──▶ JwtVerifier
//!    │
//!    └─SUBSCRIBE:X─▶ SubscriptionRegistry ──attach──▶ FeedDirectory
//!                                                       │
//!                          quote API ◀──fetch── InstrumentFeed (one per symbol)
//!                                                       │
//!                                   PopularityGate ◀────┤
//!                                                       ▼
//!                                               FanoutDispatcher ──▶ sessions
//! ```

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod feed;
pub mod popularity;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod ws_server;

pub use auth::{CredentialVerifier, Identity, JwtVerifier, TokenCacheConfig, TokenValidationCache};
pub use config::GatewayConfig;
pub use dispatcher::{FanoutDispatcher, FanoutReport};
pub use engine::{EngineConfig, EngineStats, StreamingEngine};
pub use error::{AuthError, ConfigError, FetchError, GatewayError, Result};
pub use feed::{FeedConfig, FeedDirectory, InstrumentFeed, QuoteSource};
pub use popularity::PopularityGate;
pub use protocol::{ClientCommand, ServerMessage, Snapshot, Symbol};
pub use registry::{HandleState, SubscriptionHandle, SubscriptionRegistry};
pub use session::{Session, SessionId};
pub use ws_server::{create_router, AppState};
