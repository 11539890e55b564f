//! Per-symbol polling feeds.
//!
//! Each [`InstrumentFeed`] owns one timer task. On every tick it performs at
//! most one upstream fetch, offers the result to the [`PopularityGate`] and
//! fans it out to the sessions attached to it. Subscriber count therefore
//! never multiplies upstream load.
//!
//! Feeds live in a [`FeedDirectory`], which creates them lazily on first use
//! and, when configured to, retires them once their last subscriber leaves.

use crate::dispatcher::FanoutDispatcher;
use crate::error::FetchError;
use crate::popularity::PopularityGate;
use crate::protocol::{Snapshot, Symbol};
use crate::session::{Session, SessionId};
use async_trait::async_trait;
use dashmap::DashMap;
use external_services::QuoteApiClient;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default interval between two ticks of a feed.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(5);

/// Default upper bound on a single upstream fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(4);

/// Upstream source of price snapshots.
///
/// Implementations may be slow and must tolerate concurrent calls for
/// different symbols.
#[async_trait]
pub trait QuoteSource: Send + Sync + 'static {
    async fn fetch(&self, symbol: &str) -> Result<Snapshot, FetchError>;
}

#[async_trait]
impl QuoteSource for QuoteApiClient {
    async fn fetch(&self, symbol: &str) -> Result<Snapshot, FetchError> {
        let quote = self.fetch_quote(symbol).await?;
        Ok(Snapshot::from(quote))
    }
}

/// Feed scheduling configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub tick_period: Duration,
    pub fetch_timeout: Duration,
    /// Serve a popular symbol's cached value instead of fetching.
    pub cache_first_reads: bool,
    /// Stop and drop a feed once its last subscription is released.
    pub retire_idle_feeds: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            tick_period: DEFAULT_TICK_PERIOD,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            cache_first_reads: false,
            retire_idle_feeds: false,
        }
    }
}

/// Shared polling stream for one symbol.
#[derive(Debug)]
pub struct InstrumentFeed {
    symbol: Symbol,
    /// Sessions holding a live subscription handle for this symbol.
    subscribers: DashMap<SessionId, Arc<Session>>,
    last_snapshot: RwLock<Option<Snapshot>>,
    ticks: AtomicU64,
    cancel: CancellationToken,
}

impl InstrumentFeed {
    fn new(symbol: Symbol, cancel: CancellationToken) -> Self {
        Self {
            symbol,
            subscribers: DashMap::new(),
            last_snapshot: RwLock::new(None),
            ticks: AtomicU64::new(0),
            cancel,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Number of sessions currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_attached(&self, session_id: &SessionId) -> bool {
        self.subscribers.contains_key(session_id)
    }

    /// Most recent successfully fetched snapshot.
    pub fn last_snapshot(&self) -> Option<Snapshot> {
        self.last_snapshot.read().clone()
    }

    /// Number of ticks started so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the timer task. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Attached sessions, collected so no map lock is held while sending.
    fn sessions(&self) -> Vec<Arc<Session>> {
        self.subscribers.iter().map(|e| e.value().clone()).collect()
    }

    /// Returns true if the session was not attached before.
    fn attach(&self, session: Arc<Session>) -> bool {
        self.subscribers.insert(session.id(), session).is_none()
    }

    /// Returns true if the session was attached.
    fn detach(&self, session_id: &SessionId) -> bool {
        self.subscribers.remove(session_id).is_some()
    }

    /// Run one tick: fetch, offer to the cache, fan out.
    pub async fn tick(
        &self,
        source: &dyn QuoteSource,
        gate: &PopularityGate,
        dispatcher: &FanoutDispatcher,
        config: &FeedConfig,
    ) {
        let seq = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let cached = if config.cache_first_reads {
            gate.popular_cached(&self.symbol)
        } else {
            None
        };

        let result = match cached {
            Some(snapshot) => Ok(snapshot),
            None => self.fetch(source, config.fetch_timeout).await,
        };

        match result {
            Ok(snapshot) => {
                gate.record(&snapshot);
                *self.last_snapshot.write() = Some(snapshot.clone());

                let sessions = self.sessions();
                let report = dispatcher.fan_out(sessions.iter().map(Arc::as_ref), &snapshot);
                debug!(
                    "Tick {} for {}: delivered to {} sessions ({} failed)",
                    seq, self.symbol, report.delivered, report.failed
                );
            }
            Err(e) => {
                counter!("price_gateway_fetch_failures_total").increment(1);
                warn!("Tick {} for {}: fetch failed: {}", seq, self.symbol, e);
                let sessions = self.sessions();
                dispatcher.fan_out_error(sessions.iter().map(Arc::as_ref), &e.to_string());
            }
        }
    }

    async fn fetch(
        &self,
        source: &dyn QuoteSource,
        timeout: Duration,
    ) -> Result<Snapshot, FetchError> {
        counter!("price_gateway_fetches_total").increment(1);
        match tokio::time::timeout(timeout, source.fetch(&self.symbol)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                symbol: self.symbol.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn run(
        self: Arc<Self>,
        source: Arc<dyn QuoteSource>,
        gate: Arc<PopularityGate>,
        dispatcher: Arc<FanoutDispatcher>,
        config: FeedConfig,
    ) {
        let mut ticker = interval(config.tick_period);
        // A tick that overruns is skipped, never bunched up.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = self.tick(source.as_ref(), &gate, &dispatcher, &config) => {}
                    }
                }
            }
        }

        debug!("Feed {} stopped after {} ticks", self.symbol, self.tick_count());
    }
}

/// Symbol → feed map and the dependencies needed to start new feeds.
pub struct FeedDirectory {
    feeds: DashMap<Symbol, Arc<InstrumentFeed>>,
    source: Arc<dyn QuoteSource>,
    gate: Arc<PopularityGate>,
    dispatcher: Arc<FanoutDispatcher>,
    config: FeedConfig,
    shutdown: CancellationToken,
}

impl FeedDirectory {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        gate: Arc<PopularityGate>,
        dispatcher: Arc<FanoutDispatcher>,
        config: FeedConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            feeds: DashMap::new(),
            source,
            gate,
            dispatcher,
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<InstrumentFeed>> {
        self.feeds.get(symbol).map(|f| f.clone())
    }

    /// Number of running feeds.
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Get the feed for `symbol`, starting it if absent.
    pub fn ensure(&self, symbol: &str) -> Arc<InstrumentFeed> {
        self.get_or_spawn(symbol, None)
    }

    /// Attach `session` to the feed for `symbol`, starting the feed if absent.
    pub fn attach(&self, symbol: &str, session: &Arc<Session>) -> Arc<InstrumentFeed> {
        self.get_or_spawn(symbol, Some(session))
    }

    /// Detach `session_id` from `feed`, retiring the feed if configured and
    /// it is now idle.
    pub fn detach(&self, feed: &Arc<InstrumentFeed>, session_id: &SessionId) {
        feed.detach(session_id);

        if !self.config.retire_idle_feeds {
            return;
        }

        let retired = self.feeds.remove_if(feed.symbol(), |_, current| {
            Arc::ptr_eq(current, feed) && current.subscriber_count() == 0
        });
        if let Some((symbol, feed)) = retired {
            feed.stop();
            gauge!("price_gateway_active_feeds").set(self.feeds.len() as f64);
            info!("Retired idle feed for {}", symbol);
        }
    }

    /// Stop every feed. Used on shutdown.
    pub fn stop_all(&self) {
        for entry in self.feeds.iter() {
            entry.value().stop();
        }
    }

    /// The attach happens under the map entry lock so a concurrent
    /// retirement cannot remove the feed between lookup and attach.
    fn get_or_spawn(&self, symbol: &str, session: Option<&Arc<Session>>) -> Arc<InstrumentFeed> {
        let mut created = false;
        let feed = {
            let entry = self.feeds.entry(symbol.to_string()).or_insert_with(|| {
                created = true;
                self.spawn(symbol)
            });
            if let Some(session) = session {
                entry.attach(session.clone());
            }
            entry.clone()
        };

        if created {
            gauge!("price_gateway_active_feeds").set(self.feeds.len() as f64);
        }
        feed
    }

    fn spawn(&self, symbol: &str) -> Arc<InstrumentFeed> {
        let feed = Arc::new(InstrumentFeed::new(
            symbol.to_string(),
            self.shutdown.child_token(),
        ));

        tokio::spawn(feed.clone().run(
            self.source.clone(),
            self.gate.clone(),
            self.dispatcher.clone(),
            self.config.clone(),
        ));

        counter!("price_gateway_feeds_started_total").increment(1);
        info!("Started feed for {} (every {:?})", symbol, self.config.tick_period);
        feed
    }
}
