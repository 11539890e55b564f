//! Popularity accounting and the last-value cache.
//!
//! A symbol is popular while at least `threshold` distinct users hold it in
//! their subscription set. Only popular symbols get their latest snapshot
//! written to the last-value cache; falling below the threshold stops further
//! writes but leaves the cached value in place.

use crate::protocol::{Snapshot, Symbol};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::counter;
use tracing::debug;

/// Default number of distinct users that makes a symbol popular.
pub const DEFAULT_POPULARITY_THRESHOLD: usize = 5;

#[derive(Debug)]
pub struct PopularityGate {
    threshold: usize,
    /// Symbol → number of distinct users subscribed.
    subscribers: DashMap<Symbol, usize>,
    /// Symbol → last snapshot observed while popular.
    last_values: DashMap<Symbol, Snapshot>,
}

impl Default for PopularityGate {
    fn default() -> Self {
        Self::new(DEFAULT_POPULARITY_THRESHOLD)
    }
}

impl PopularityGate {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            subscribers: DashMap::new(),
            last_values: DashMap::new(),
        }
    }

    /// Record that one more distinct user subscribed to `symbol`.
    /// Returns the new count.
    pub fn user_subscribed(&self, symbol: &str) -> usize {
        let mut count = self.subscribers.entry(symbol.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Record that one distinct user dropped `symbol`. Returns the new count.
    pub fn user_unsubscribed(&self, symbol: &str) -> usize {
        match self.subscribers.entry(symbol.to_string()) {
            Entry::Occupied(mut entry) => {
                let count = entry.get_mut();
                *count = count.saturating_sub(1);
                let remaining = *count;
                if remaining == 0 {
                    entry.remove();
                }
                remaining
            }
            Entry::Vacant(_) => 0,
        }
    }

    /// Number of distinct users currently subscribed to `symbol`.
    pub fn subscriber_count(&self, symbol: &str) -> usize {
        self.subscribers.get(symbol).map(|c| *c).unwrap_or(0)
    }

    pub fn is_popular(&self, symbol: &str) -> bool {
        self.subscriber_count(symbol) >= self.threshold
    }

    /// Offer a fresh snapshot to the cache. Stored only if the symbol is
    /// popular right now; returns whether it was stored.
    pub fn record(&self, snapshot: &Snapshot) -> bool {
        if !self.is_popular(&snapshot.symbol) {
            return false;
        }
        self.last_values
            .insert(snapshot.symbol.clone(), snapshot.clone());
        counter!("price_gateway_cache_writes_total").increment(1);
        debug!("Cached last value for popular symbol {}", snapshot.symbol);
        true
    }

    /// Cached snapshot regardless of current popularity.
    pub fn cached(&self, symbol: &str) -> Option<Snapshot> {
        self.last_values.get(symbol).map(|s| s.clone())
    }

    /// Cached snapshot, but only while the symbol is still popular.
    pub fn popular_cached(&self, symbol: &str) -> Option<Snapshot> {
        if self.is_popular(symbol) {
            self.cached(symbol)
        } else {
            None
        }
    }

    /// Number of symbols with a cached last value.
    pub fn cached_count(&self) -> usize {
        self.last_values.len()
    }
}
