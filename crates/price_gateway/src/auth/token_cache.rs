//! Bounded LRU cache of validated credentials.
//!
//! Entries live in a slab (`Vec<Option<Node>>`) linked into a recency list by
//! index, with a `HashMap` from credential to slot. Hits move a node to the
//! front, inserts past capacity evict from the back, and a periodic sweep
//! drops everything past its deadline. One mutex guards the whole structure;
//! it is never held across the verifier call.

use super::{CredentialVerifier, Identity};
use crate::error::AuthError;
use chrono::Utc;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_TOKEN_CACHE_CAPACITY: usize = 1000;
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct TokenCacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
    pub sweep_period: Duration,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_TOKEN_CACHE_CAPACITY,
            ttl: DEFAULT_TOKEN_TTL,
            sweep_period: DEFAULT_SWEEP_PERIOD,
        }
    }
}

struct Node {
    credential: String,
    identity: Identity,
    expires_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Recency-ordered slab. `head` is most recently used.
struct Lru {
    capacity: usize,
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl Lru {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn node(&self, slot: usize) -> Option<&Node> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Live entry for `credential`, promoted to most recently used. An
    /// expired entry is removed and reported as a miss.
    fn get(&mut self, credential: &str, now: Instant) -> Option<Identity> {
        let slot = *self.index.get(credential)?;
        let expired = self.node(slot).map_or(true, |n| now >= n.expires_at);
        if expired {
            self.remove(slot);
            return None;
        }
        self.unlink(slot);
        self.push_front(slot);
        self.node(slot).map(|n| n.identity.clone())
    }

    /// Insert or overwrite. Returns how many entries were evicted to make room.
    fn insert(&mut self, credential: &str, identity: Identity, expires_at: Instant) -> usize {
        if self.capacity == 0 {
            return 0;
        }

        if let Some(&slot) = self.index.get(credential) {
            if let Some(node) = self.node_mut(slot) {
                node.identity = identity;
                node.expires_at = expires_at;
            }
            self.unlink(slot);
            self.push_front(slot);
            return 0;
        }

        let mut evicted = 0;
        while self.len() >= self.capacity {
            match self.tail {
                Some(tail) => {
                    self.remove(tail);
                    evicted += 1;
                }
                None => break,
            }
        }

        let node = Node {
            credential: credential.to_string(),
            identity,
            expires_at,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(credential.to_string(), slot);
        self.push_front(slot);
        evicted
    }

    /// Drop every entry whose deadline has passed. Returns the number removed.
    fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<usize> = self
            .index
            .values()
            .copied()
            .filter(|&slot| self.node(slot).is_some_and(|n| now >= n.expires_at))
            .collect();
        for &slot in &expired {
            self.remove(slot);
        }
        expired.len()
    }

    fn remove(&mut self, slot: usize) {
        self.unlink(slot);
        if let Some(node) = self.slots.get_mut(slot).and_then(Option::take) {
            self.index.remove(&node.credential);
            self.free.push(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.node(slot) {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.node_mut(nx) {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(n) = self.node_mut(slot) {
            n.prev = None;
            n.next = None;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(n) = self.node_mut(slot) {
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(n) = self.node_mut(h) {
                n.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    #[cfg(test)]
    fn credentials_by_recency(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            match self.node(slot) {
                Some(n) => {
                    out.push(n.credential.clone());
                    cursor = n.next;
                }
                None => break,
            }
        }
        out
    }
}

/// Caching front for a [`CredentialVerifier`].
///
/// Only successful verifications are cached; a rejected credential is
/// re-checked on every attempt.
pub struct TokenValidationCache {
    verifier: Arc<dyn CredentialVerifier>,
    config: TokenCacheConfig,
    entries: Mutex<Lru>,
}

impl TokenValidationCache {
    pub fn new(verifier: Arc<dyn CredentialVerifier>, config: TokenCacheConfig) -> Self {
        let entries = Mutex::new(Lru::new(config.capacity));
        Self {
            verifier,
            config,
            entries,
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn validate(&self, credential: &str) -> Result<Identity, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let hit = self.entries.lock().get(credential, Instant::now());
        if let Some(identity) = hit {
            counter!("price_gateway_token_cache_hits_total").increment(1);
            return Ok(identity);
        }
        counter!("price_gateway_token_cache_misses_total").increment(1);

        let identity = match self.verifier.verify(credential).await {
            Ok(identity) => identity,
            Err(e) => {
                counter!("price_gateway_token_rejections_total").increment(1);
                debug!("Credential rejected: {}", e);
                return Err(e);
            }
        };

        let now = Instant::now();
        let expires_at = now + self.lifetime(&identity);
        let (evicted, len) = {
            let mut entries = self.entries.lock();
            let evicted = entries.insert(credential, identity.clone(), expires_at);
            (evicted, entries.len())
        };

        if evicted > 0 {
            counter!("price_gateway_token_cache_evictions_total").increment(evicted as u64);
        }
        gauge!("price_gateway_token_cache_entries").set(len as f64);
        debug!("Cached credential for {}", identity.username);
        Ok(identity)
    }

    /// Remove all expired entries. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let (removed, len) = {
            let mut entries = self.entries.lock();
            let removed = entries.sweep(Instant::now());
            (removed, entries.len())
        };
        gauge!("price_gateway_token_cache_entries").set(len as f64);
        if removed > 0 {
            counter!("price_gateway_token_cache_expired_total").increment(removed as u64);
            info!("Token cache sweep removed {} expired entries", removed);
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `sweep_period` until `shutdown`.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        let period = self.config.sweep_period;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Token cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                }
            }
        })
    }

    /// Configured TTL, shortened when the credential expires sooner.
    fn lifetime(&self, identity: &Identity) -> Duration {
        let remaining = identity
            .expires_at
            .and_then(|at| (at - Utc::now()).to_std().ok());
        match remaining {
            Some(remaining) => remaining.min(self.config.ttl),
            None if identity.expires_at.is_some() => Duration::ZERO,
            None => self.config.ttl,
        }
    }
}
