//! Users, sessions, symbols and the handles binding them to feeds.
//!
//! Three maps, each behind its own sharded lock:
//!
//! - user → subscribed symbols (survives disconnects)
//! - user → attached sessions
//! - session → symbol → [`SubscriptionHandle`]
//!
//! A handle exists for a (session, symbol) pair exactly while the session is
//! attached and its user holds the symbol. Empty inner collections are
//! removed so a user or session with nothing left leaves no residue.
//!
//! Subscribe, unsubscribe and attach hold the user's subscription entry while
//! they bind or release handles, which serializes them per user. Lock order
//! is always subscriptions → sessions → handles → feeds.

use crate::dispatcher::FanoutDispatcher;
use crate::feed::{FeedDirectory, InstrumentFeed};
use crate::popularity::PopularityGate;
use crate::protocol::Symbol;
use crate::session::{Session, SessionId};
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Lifecycle of a [`SubscriptionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Active,
    /// Terminal.
    Released,
}

/// "Session S receives feed F's snapshots."
///
/// Releasing detaches the session from the feed exactly once; further calls
/// are no-ops. Dropping an active handle releases it.
pub struct SubscriptionHandle {
    session_id: SessionId,
    feed: Arc<InstrumentFeed>,
    feeds: Arc<FeedDirectory>,
    released: AtomicBool,
}

impl SubscriptionHandle {
    fn bind(session: &Arc<Session>, symbol: &str, feeds: &Arc<FeedDirectory>) -> Self {
        let feed = feeds.attach(symbol, session);
        Self {
            session_id: session.id(),
            feed,
            feeds: feeds.clone(),
            released: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn symbol(&self) -> &str {
        self.feed.symbol()
    }

    pub fn state(&self) -> HandleState {
        if self.released.load(Ordering::Acquire) {
            HandleState::Released
        } else {
            HandleState::Active
        }
    }

    /// Returns true only for the call that performed the release.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.feeds.detach(&self.feed, &self.session_id);
        true
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("session_id", &self.session_id)
            .field("symbol", &self.symbol())
            .field("state", &self.state())
            .finish()
    }
}

/// Owns all user/session/subscription state.
pub struct SubscriptionRegistry {
    user_subscriptions: DashMap<String, HashSet<Symbol>>,
    user_sessions: DashMap<String, HashMap<SessionId, Arc<Session>>>,
    session_handles: DashMap<SessionId, HashMap<Symbol, SubscriptionHandle>>,
    feeds: Arc<FeedDirectory>,
    gate: Arc<PopularityGate>,
    dispatcher: Arc<FanoutDispatcher>,
}

impl SubscriptionRegistry {
    pub fn new(
        feeds: Arc<FeedDirectory>,
        gate: Arc<PopularityGate>,
        dispatcher: Arc<FanoutDispatcher>,
    ) -> Self {
        Self {
            user_subscriptions: DashMap::new(),
            user_sessions: DashMap::new(),
            session_handles: DashMap::new(),
            feeds,
            gate,
            dispatcher,
        }
    }

    /// Add `symbol` to `user`'s subscription set and bind every attached
    /// session of that user to the symbol's feed.
    ///
    /// `origin` is the session the command arrived on, if any. It need not be
    /// attached (command-only sockets never are). Returns true if the symbol
    /// was not already in the set.
    pub fn subscribe(&self, user: &str, origin: Option<&Session>, symbol: &str) -> bool {
        // The user's entry stays locked across the binds, so an unsubscribe or
        // attach for the same user cannot interleave with them.
        let mut symbols = self.user_subscriptions.entry(user.to_string()).or_default();
        let added = symbols.insert(symbol.to_string());
        if added {
            self.gate.user_subscribed(symbol);
            counter!("price_gateway_subscriptions_total").increment(1);
        }

        // Without retirement a feed is created on first subscribe even if the
        // user has no live session yet; with retirement only bound feeds run.
        if !self.feeds.config().retire_idle_feeds {
            self.feeds.ensure(symbol);
        }

        for session in self.sessions_of(user) {
            self.bind(&session, symbol);
        }
        drop(symbols);

        debug!(
            "User {} subscribed to {} (new: {}, via session {:?})",
            user,
            symbol,
            added,
            origin.map(Session::id)
        );
        added
    }

    /// Remove `symbol` from `user`'s set and release the handle of every
    /// attached session of that user. Returns true if the symbol was present.
    pub fn unsubscribe(&self, user: &str, symbol: &str) -> bool {
        let mut released = 0;
        let removed = match self.user_subscriptions.get_mut(user) {
            Some(mut symbols) => {
                let removed = symbols.remove(symbol);
                if removed {
                    self.gate.user_unsubscribed(symbol);
                }
                for session in self.sessions_of(user) {
                    if self.unbind(session.id(), symbol) {
                        released += 1;
                    }
                }
                removed
            }
            None => false,
        };
        self.user_subscriptions
            .remove_if(user, |_, symbols| symbols.is_empty());

        debug!(
            "User {} unsubscribed from {} (present: {}, released {} handles)",
            user, symbol, removed, released
        );
        removed
    }

    /// Record that `session` now represents its user and bind it to every
    /// symbol the user already holds.
    pub fn attach_session(&self, session: Arc<Session>) {
        let user = session.user().to_string();
        self.user_sessions
            .entry(user.clone())
            .or_default()
            .insert(session.id(), session.clone());

        // Registered first: a subscribe racing with this either sees the
        // session or finishes before the read guard below is granted.
        let bound = match self.user_subscriptions.get(&user) {
            Some(symbols) => {
                for symbol in symbols.iter() {
                    self.bind(&session, symbol);
                }
                symbols.len()
            }
            None => 0,
        };

        gauge!("price_gateway_attached_sessions").set(self.session_count() as f64);
        info!(
            "Session {} attached for {} with {} subscriptions",
            session.id(),
            user,
            bound
        );
    }

    /// Release every handle owned by `session` and forget the session.
    /// Other sessions of the same user are untouched. Returns the number of
    /// handles released.
    pub fn detach_session(&self, session: &Session) -> usize {
        let user = session.user();
        let was_attached = match self.user_sessions.get_mut(user) {
            Some(mut sessions) => sessions.remove(&session.id()).is_some(),
            None => false,
        };
        self.user_sessions
            .remove_if(user, |_, sessions| sessions.is_empty());

        let handles = self
            .session_handles
            .remove(&session.id())
            .map(|(_, handles)| handles)
            .unwrap_or_default();
        let released = handles.values().filter(|h| h.release()).count();

        if was_attached {
            gauge!("price_gateway_attached_sessions").set(self.session_count() as f64);
            info!(
                "Session {} detached for {}, released {} handles",
                session.id(),
                user,
                released
            );
        }
        released
    }

    /// Symbols `user` is subscribed to, sorted.
    pub fn subscriptions(&self, user: &str) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .user_subscriptions
            .get(user)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        symbols.sort();
        symbols
    }

    pub fn is_subscribed(&self, user: &str, symbol: &str) -> bool {
        self.user_subscriptions
            .get(user)
            .is_some_and(|s| s.contains(symbol))
    }

    /// Sessions currently attached for `user`.
    pub fn sessions_of(&self, user: &str) -> Vec<Arc<Session>> {
        self.user_sessions
            .get(user)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_attached(&self, session: &Session) -> bool {
        self.user_sessions
            .get(session.user())
            .is_some_and(|s| s.contains_key(&session.id()))
    }

    /// State of the handle for (session, symbol), if one exists.
    pub fn handle_state(&self, session_id: &SessionId, symbol: &str) -> Option<HandleState> {
        self.session_handles
            .get(session_id)
            .and_then(|handles| handles.get(symbol).map(SubscriptionHandle::state))
    }

    /// Users with at least one subscription.
    pub fn user_count(&self) -> usize {
        self.user_subscriptions.len()
    }

    /// Attached sessions across all users.
    pub fn session_count(&self) -> usize {
        self.user_sessions.iter().map(|e| e.value().len()).sum()
    }

    /// Live handles across all sessions.
    pub fn handle_count(&self) -> usize {
        self.session_handles.iter().map(|e| e.value().len()).sum()
    }

    /// Whether `user` has a top-level entry in the subscription map.
    pub fn has_subscription_entry(&self, user: &str) -> bool {
        self.user_subscriptions.contains_key(user)
    }

    /// Whether `user` has a top-level entry in the session map.
    pub fn has_session_entry(&self, user: &str) -> bool {
        self.user_sessions.contains_key(user)
    }

    /// Bind one session to one symbol unless already bound.
    fn bind(&self, session: &Arc<Session>, symbol: &str) {
        {
            let mut handles = self.session_handles.entry(session.id()).or_default();
            if handles.contains_key(symbol) {
                return;
            }

            // Replay before attaching so the cached value can never arrive
            // after a fresher tick for the same pair.
            if let Some(snapshot) = self.gate.popular_cached(symbol) {
                if self.dispatcher.deliver(session, &snapshot) {
                    counter!("price_gateway_cache_replays_total").increment(1);
                }
            }

            handles.insert(
                symbol.to_string(),
                SubscriptionHandle::bind(session, symbol, &self.feeds),
            );
        }

        // Lost a race with detach_session: drop what we just created.
        if !self.is_attached(session) {
            self.unbind(session.id(), symbol);
        }
    }

    /// Release the handle for (session, symbol). Returns true if one existed.
    fn unbind(&self, session_id: SessionId, symbol: &str) -> bool {
        let handle = match self.session_handles.get_mut(&session_id) {
            Some(mut handles) => handles.remove(symbol),
            None => None,
        };
        self.session_handles
            .remove_if(&session_id, |_, handles| handles.is_empty());

        match handle {
            Some(handle) => handle.release(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::feed::{FeedConfig, QuoteSource};
    use crate::protocol::Snapshot;
    use async_trait::async_trait;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct FixedSource;

    #[async_trait]
    impl QuoteSource for FixedSource {
        async fn fetch(&self, symbol: &str) -> Result<Snapshot, FetchError> {
            Ok(Snapshot::new(symbol, 150.25, 1))
        }
    }

    type Fixture = (SubscriptionRegistry, Arc<FeedDirectory>, Arc<PopularityGate>);

    fn registry_with(threshold: usize, config: FeedConfig) -> Fixture {
        let gate = Arc::new(PopularityGate::new(threshold));
        let dispatcher = Arc::new(FanoutDispatcher::new());
        let feeds = Arc::new(FeedDirectory::new(
            Arc::new(FixedSource),
            gate.clone(),
            dispatcher.clone(),
            config,
            CancellationToken::new(),
        ));
        (
            SubscriptionRegistry::new(feeds.clone(), gate.clone(), dispatcher),
            feeds,
            gate,
        )
    }

    fn registry() -> Fixture {
        registry_with(5, FeedConfig::default())
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[tokio::test]
    async fn test_subscribe_binds_every_attached_session() {
        let (registry, feeds, _gate) = registry();
        let (a, _ra) = Session::channel("alice", 8);
        let (b, _rb) = Session::channel("alice", 8);
        registry.attach_session(a.clone());
        registry.attach_session(b.clone());

        assert!(registry.subscribe("alice", Some(&a), "AAPL"));

        assert_eq!(registry.handle_state(&a.id(), "AAPL"), Some(HandleState::Active));
        assert_eq!(registry.handle_state(&b.id(), "AAPL"), Some(HandleState::Active));
        assert_eq!(feeds.get("AAPL").unwrap().subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (registry, feeds, gate) = registry();
        let (a, _ra) = Session::channel("alice", 8);
        registry.attach_session(a.clone());

        assert!(registry.subscribe("alice", None, "AAPL"));
        assert!(!registry.subscribe("alice", None, "AAPL"));

        assert_eq!(registry.subscriptions("alice"), vec!["AAPL".to_string()]);
        assert_eq!(registry.handle_count(), 1);
        assert_eq!(feeds.get("AAPL").unwrap().subscriber_count(), 1);
        assert_eq!(gate.subscriber_count("AAPL"), 1);
    }

    #[tokio::test]
    async fn test_subscribe_without_session_creates_feed_only() {
        let (registry, feeds, _gate) = registry();
        registry.subscribe("alice", None, "AAPL");

        assert!(registry.is_subscribed("alice", "AAPL"));
        assert_eq!(registry.handle_count(), 0);
        assert_eq!(feeds.get("AAPL").unwrap().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_attach_session_binds_existing_subscriptions() {
        let (registry, _feeds, _gate) = registry();
        registry.subscribe("alice", None, "AAPL");
        registry.subscribe("alice", None, "MSFT");

        let (a, _ra) = Session::channel("alice", 8);
        registry.attach_session(a.clone());

        assert_eq!(registry.handle_state(&a.id(), "AAPL"), Some(HandleState::Active));
        assert_eq!(registry.handle_state(&a.id(), "MSFT"), Some(HandleState::Active));
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_handles_and_collapses_user() {
        let (registry, feeds, gate) = registry();
        let (a, _ra) = Session::channel("alice", 8);
        registry.attach_session(a.clone());
        registry.subscribe("alice", None, "AAPL");

        assert!(registry.unsubscribe("alice", "AAPL"));

        assert_eq!(registry.handle_state(&a.id(), "AAPL"), None);
        assert_eq!(feeds.get("AAPL").unwrap().subscriber_count(), 0);
        assert_eq!(gate.subscriber_count("AAPL"), 0);
        assert!(!registry.has_subscription_entry("alice"));
        assert!(registry.has_session_entry("alice"));
    }

    #[tokio::test]
    async fn test_unsubscribe_twice_is_a_noop() {
        let (registry, _feeds, gate) = registry();
        let (a, _ra) = Session::channel("alice", 8);
        registry.attach_session(a.clone());
        registry.subscribe("alice", None, "AAPL");

        assert!(registry.unsubscribe("alice", "AAPL"));
        assert!(!registry.unsubscribe("alice", "AAPL"));
        assert_eq!(gate.subscriber_count("AAPL"), 0);
    }

    #[tokio::test]
    async fn test_unknown_user_and_session_are_noops() {
        let (registry, _feeds, _gate) = registry();
        let (ghost, _rx) = Session::channel("ghost", 8);

        assert!(!registry.unsubscribe("ghost", "AAPL"));
        assert_eq!(registry.detach_session(&ghost), 0);
        assert!(registry.subscriptions("ghost").is_empty());
        assert!(!registry.has_session_entry("ghost"));
    }

    #[tokio::test]
    async fn test_detach_session_isolated_from_other_sessions() {
        let (registry, feeds, _gate) = registry();
        let (a, _ra) = Session::channel("alice", 8);
        let (b, _rb) = Session::channel("alice", 8);
        let (c, _rc) = Session::channel("bob", 8);
        registry.attach_session(a.clone());
        registry.attach_session(b.clone());
        registry.attach_session(c.clone());
        registry.subscribe("alice", None, "AAPL");
        registry.subscribe("bob", None, "AAPL");

        assert_eq!(registry.detach_session(&a), 1);

        assert_eq!(registry.handle_state(&a.id(), "AAPL"), None);
        assert_eq!(registry.handle_state(&b.id(), "AAPL"), Some(HandleState::Active));
        assert_eq!(registry.handle_state(&c.id(), "AAPL"), Some(HandleState::Active));
        assert_eq!(feeds.get("AAPL").unwrap().subscriber_count(), 2);
        // Subscriptions outlive sessions.
        assert!(registry.is_subscribed("alice", "AAPL"));
    }

    #[tokio::test]
    async fn test_last_session_detach_collapses_session_entry() {
        let (registry, _feeds, _gate) = registry();
        let (a, _ra) = Session::channel("alice", 8);
        registry.attach_session(a.clone());
        registry.subscribe("alice", None, "AAPL");

        registry.detach_session(&a);
        assert!(!registry.has_session_entry("alice"));
        assert_eq!(registry.handle_count(), 0);

        // Reconnect picks the subscription back up.
        let (a2, _ra2) = Session::channel("alice", 8);
        registry.attach_session(a2.clone());
        assert_eq!(registry.handle_state(&a2.id(), "AAPL"), Some(HandleState::Active));
    }

    #[tokio::test]
    async fn test_popularity_counts_users_not_sessions() {
        let (registry, _feeds, gate) = registry();
        for _ in 0..3 {
            let (s, _rx) = Session::channel("alice", 8);
            registry.attach_session(s);
        }
        registry.subscribe("alice", None, "AAPL");
        registry.subscribe("bob", None, "AAPL");

        assert_eq!(gate.subscriber_count("AAPL"), 2);
    }

    #[tokio::test]
    async fn test_cached_value_replayed_only_when_popular() {
        let (registry, _feeds, gate) = registry_with(2, FeedConfig::default());
        registry.subscribe("alice", None, "AAPL");
        registry.subscribe("bob", None, "AAPL");
        assert!(gate.record(&Snapshot::new("AAPL", 99.0, 9)));

        let (c, mut rc) = Session::channel("carol", 8);
        registry.attach_session(c.clone());
        registry.subscribe("carol", Some(&c), "AAPL");
        match rc.try_recv().unwrap() {
            Message::Text(t) => assert!(t.as_str().contains("99")),
            other => panic!("unexpected frame: {other:?}"),
        }

        // Drop below the threshold: the value stays cached but is not replayed.
        registry.unsubscribe("alice", "AAPL");
        registry.unsubscribe("bob", "AAPL");
        registry.unsubscribe("carol", "AAPL");
        let (d, mut rd) = Session::channel("dave", 8);
        registry.attach_session(d.clone());
        registry.subscribe("dave", Some(&d), "AAPL");
        assert_eq!(drain(&mut rd), 0);
        assert!(gate.cached("AAPL").is_some());
    }

    #[tokio::test]
    async fn test_handle_release_is_idempotent() {
        let (registry, feeds, _gate) = registry();
        let (a, _ra) = Session::channel("alice", 8);
        registry.attach_session(a.clone());
        let handle = SubscriptionHandle::bind(&a, "AAPL", &feeds);

        assert_eq!(handle.state(), HandleState::Active);
        assert!(handle.release());
        assert!(!handle.release());
        assert_eq!(handle.state(), HandleState::Released);
        assert_eq!(handle.symbol(), "AAPL");
        assert_eq!(handle.session_id(), a.id());
    }

    #[tokio::test]
    async fn test_dropping_handle_detaches_from_feed() {
        let (_registry, feeds, _gate) = registry();
        let (a, _ra) = Session::channel("alice", 8);
        let handle = SubscriptionHandle::bind(&a, "AAPL", &feeds);
        let feed = feeds.get("AAPL").unwrap();
        assert!(feed.is_attached(&a.id()));

        drop(handle);
        assert!(!feed.is_attached(&a.id()));
    }

    #[tokio::test]
    async fn test_retired_feed_restarts_on_resubscribe() {
        let config = FeedConfig {
            retire_idle_feeds: true,
            ..FeedConfig::default()
        };
        let (registry, feeds, _gate) = registry_with(5, config);
        registry.subscribe("alice", None, "AAPL");
        assert!(feeds.get("AAPL").is_none());

        let (a, _ra) = Session::channel("alice", 8);
        registry.attach_session(a.clone());
        let first = feeds.get("AAPL").unwrap();

        registry.unsubscribe("alice", "AAPL");
        assert!(feeds.get("AAPL").is_none());
        assert!(first.is_stopped());

        registry.subscribe("alice", None, "AAPL");
        let second = feeds.get("AAPL").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.subscriber_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_toggle_leaves_no_stray_handle() {
        let (registry, feeds, gate) = registry();
        let registry = Arc::new(registry);
        let (session, _rx) = Session::channel("alice", 1024);
        registry.attach_session(session.clone());

        for round in 0..2_000 {
            let symbol = format!("S{}", round % 4);
            let subscribe = {
                let registry = registry.clone();
                let symbol = symbol.clone();
                tokio::spawn(async move {
                    registry.subscribe("alice", None, &symbol);
                })
            };
            let unsubscribe = {
                let registry = registry.clone();
                let symbol = symbol.clone();
                tokio::spawn(async move {
                    registry.unsubscribe("alice", &symbol);
                })
            };
            subscribe.await.unwrap();
            unsubscribe.await.unwrap();

            let subscribed = registry.is_subscribed("alice", &symbol);
            let has_handle = registry.handle_state(&session.id(), &symbol).is_some();
            let on_feed = feeds
                .get(&symbol)
                .is_some_and(|feed| feed.is_attached(&session.id()));
            assert_eq!(subscribed, has_handle, "round {round}");
            assert_eq!(subscribed, on_feed, "round {round}");
            assert_eq!(gate.subscriber_count(&symbol), usize::from(subscribed));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutation_preserves_invariants() {
        const USERS: usize = 8;
        const SYMBOLS: [&str; 5] = ["A", "B", "C", "D", "E"];

        let (registry, feeds, gate) = registry();
        let registry = Arc::new(registry);

        let mut tasks = Vec::new();
        for u in 0..USERS {
            for worker in 0..3 {
                let registry = registry.clone();
                tasks.push(tokio::spawn(async move {
                    let user = format!("user{u}");
                    let mut sessions = Vec::new();
                    for step in 0..300usize {
                        let symbol = SYMBOLS[(step * 7 + worker * 3 + u) % SYMBOLS.len()];
                        match (step + worker) % 6 {
                            0 | 1 => {
                                registry.subscribe(&user, None, symbol);
                            }
                            2 => {
                                registry.unsubscribe(&user, symbol);
                            }
                            3 => {
                                let (session, rx) = Session::channel(user.clone(), 4);
                                registry.attach_session(session.clone());
                                sessions.push((session, rx));
                            }
                            4 => {
                                if let Some((session, _rx)) = sessions.pop() {
                                    registry.detach_session(&session);
                                }
                            }
                            _ => tokio::task::yield_now().await,
                        }
                    }
                    sessions
                }));
            }
        }

        let mut attached = Vec::new();
        for task in tasks {
            attached.extend(task.await.unwrap());
        }
        assert_eq!(registry.session_count(), attached.len());

        let mut expected_handles = 0;
        for u in 0..USERS {
            let user = format!("user{u}");
            let symbols = registry.subscriptions(&user);
            let sessions = registry.sessions_of(&user);

            // No empty-set residue.
            assert_eq!(registry.has_subscription_entry(&user), !symbols.is_empty());
            assert_eq!(registry.has_session_entry(&user), !sessions.is_empty());

            // A handle exists iff the session is attached and the user holds the symbol.
            for session in &sessions {
                for symbol in SYMBOLS {
                    assert_eq!(
                        registry.handle_state(&session.id(), symbol).is_some(),
                        symbols.iter().any(|s| s == symbol),
                        "{user} {symbol}"
                    );
                }
            }
            expected_handles += symbols.len() * sessions.len();
        }
        assert_eq!(registry.handle_count(), expected_handles);
        assert!(registry.session_handles.iter().all(|e| !e.value().is_empty()));

        for symbol in SYMBOLS {
            let holders: Vec<String> = (0..USERS)
                .map(|u| format!("user{u}"))
                .filter(|user| registry.is_subscribed(user, symbol))
                .collect();
            // Distinct users, not sessions.
            assert_eq!(gate.subscriber_count(symbol), holders.len(), "{symbol}");

            let sessions: usize = holders.iter().map(|u| registry.sessions_of(u).len()).sum();
            let on_feed = feeds.get(symbol).map_or(0, |feed| feed.subscriber_count());
            assert_eq!(on_feed, sessions, "{symbol}");
        }
    }
}
