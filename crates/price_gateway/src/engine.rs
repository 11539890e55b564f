//! Streaming engine: the registry, feeds, popularity gate and dispatcher
//! wired together behind the operations a transport needs.

use crate::dispatcher::{DispatchStats, FanoutDispatcher};
use crate::feed::{FeedConfig, FeedDirectory, QuoteSource};
use crate::popularity::{PopularityGate, DEFAULT_POPULARITY_THRESHOLD};
use crate::protocol::{ClientCommand, ServerMessage};
use crate::registry::SubscriptionRegistry;
use crate::session::Session;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub feed: FeedConfig,
    pub popularity_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            popularity_threshold: DEFAULT_POPULARITY_THRESHOLD,
        }
    }
}

/// Point-in-time counters for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub users: usize,
    pub sessions: usize,
    pub handles: usize,
    pub feeds: usize,
    pub cached_symbols: usize,
    pub delivered: u64,
    pub delivery_failures: u64,
}

pub struct StreamingEngine {
    registry: SubscriptionRegistry,
    feeds: Arc<FeedDirectory>,
    gate: Arc<PopularityGate>,
    dispatcher: Arc<FanoutDispatcher>,
    shutdown: CancellationToken,
}

impl StreamingEngine {
    pub fn new(source: Arc<dyn QuoteSource>, config: EngineConfig) -> Self {
        Self::with_shutdown(source, config, CancellationToken::new())
    }

    /// Feed tasks are cancelled through children of `shutdown`.
    pub fn with_shutdown(
        source: Arc<dyn QuoteSource>,
        config: EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let gate = Arc::new(PopularityGate::new(config.popularity_threshold));
        let dispatcher = Arc::new(FanoutDispatcher::new());
        let feeds = Arc::new(FeedDirectory::new(
            source,
            gate.clone(),
            dispatcher.clone(),
            config.feed,
            shutdown.clone(),
        ));
        let registry = SubscriptionRegistry::new(feeds.clone(), gate.clone(), dispatcher.clone());

        Self {
            registry,
            feeds,
            gate,
            dispatcher,
            shutdown,
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn feeds(&self) -> &FeedDirectory {
        &self.feeds
    }

    pub fn gate(&self) -> &PopularityGate {
        &self.gate
    }

    pub fn dispatcher(&self) -> &FanoutDispatcher {
        &self.dispatcher
    }

    /// A data session came up: start streaming its user's subscriptions.
    pub fn connect(&self, session: Arc<Session>) {
        self.registry.attach_session(session);
    }

    /// A data session went away. Returns the number of handles released.
    pub fn disconnect(&self, session: &Session) -> usize {
        self.registry.detach_session(session)
    }

    /// Parse and apply one inbound text frame, returning the reply for the
    /// sender. Malformed input never closes the session.
    pub fn handle_text(&self, session: &Session, payload: &str) -> ServerMessage {
        match payload.parse::<ClientCommand>() {
            Ok(command) => self.handle_command(session, command),
            Err(e) => {
                debug!("Session {}: {}", session.id(), e);
                ServerMessage::InvalidCommand
            }
        }
    }

    pub fn handle_command(&self, session: &Session, command: ClientCommand) -> ServerMessage {
        match command {
            ClientCommand::Subscribe(symbol) => {
                self.registry.subscribe(session.user(), Some(session), &symbol);
                ServerMessage::Subscribed(symbol)
            }
            ClientCommand::Unsubscribe(symbol) => {
                self.registry.unsubscribe(session.user(), &symbol);
                ServerMessage::Unsubscribed(symbol)
            }
        }
    }

    pub fn stats(&self) -> EngineStats {
        let DispatchStats { delivered, failed } = self.dispatcher.stats();
        EngineStats {
            users: self.registry.user_count(),
            sessions: self.registry.session_count(),
            handles: self.registry.handle_count(),
            feeds: self.feeds.len(),
            cached_symbols: self.gate.cached_count(),
            delivered,
            delivery_failures: failed,
        }
    }

    /// Stop every feed task.
    pub fn shutdown(&self) {
        info!("Stopping {} feeds", self.feeds.len());
        self.shutdown.cancel();
        self.feeds.stop_all();
    }
}
