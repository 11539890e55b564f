//! Per-session delivery of feed output.
//!
//! Every frame is queued with `try_send`, so one stalled or closed session can
//! never block a feed tick or the sessions after it. Failures are counted and
//! logged, never retried and never propagated.

use crate::protocol::{ServerMessage, Snapshot};
use crate::session::Session;
use axum::extract::ws::{Message, Utf8Bytes};
use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Running totals since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
pub struct FanoutDispatcher {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl FanoutDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send one snapshot to one session.
    pub fn deliver(&self, session: &Session, snapshot: &Snapshot) -> bool {
        match snapshot.render() {
            Ok(json) => self.send(session, Utf8Bytes::from(json)),
            Err(e) => {
                warn!("Failed to serialize snapshot for {}: {}", snapshot.symbol, e);
                false
            }
        }
    }

    /// Send an `Error: <cause>` notification to one session.
    pub fn deliver_error(&self, session: &Session, cause: &str) -> bool {
        let text = ServerMessage::Error(cause.to_string()).to_string();
        self.send(session, Utf8Bytes::from(text))
    }

    /// Send one snapshot to every session, serializing it once.
    pub fn fan_out<'a, I>(&self, sessions: I, snapshot: &Snapshot) -> FanoutReport
    where
        I: IntoIterator<Item = &'a Session>,
    {
        let json = match snapshot.render() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                warn!("Failed to serialize snapshot for {}: {}", snapshot.symbol, e);
                return FanoutReport::default();
            }
        };
        self.send_all(sessions, json)
    }

    /// Send the same error notification to every session.
    pub fn fan_out_error<'a, I>(&self, sessions: I, cause: &str) -> FanoutReport
    where
        I: IntoIterator<Item = &'a Session>,
    {
        let text = Utf8Bytes::from(ServerMessage::Error(cause.to_string()).to_string());
        self.send_all(sessions, text)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn send_all<'a, I>(&self, sessions: I, text: Utf8Bytes) -> FanoutReport
    where
        I: IntoIterator<Item = &'a Session>,
    {
        let mut report = FanoutReport::default();
        for session in sessions {
            if self.send(session, text.clone()) {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    fn send(&self, session: &Session, text: Utf8Bytes) -> bool {
        match session.try_send_message(Message::Text(text)) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                counter!("price_gateway_deliveries_total").increment(1);
                true
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                counter!("price_gateway_delivery_failures_total").increment(1);
                match e {
                    TrySendError::Full(_) => warn!(
                        "Dropping frame for session {} ({}): outbound queue full",
                        session.id(),
                        session.user()
                    ),
                    TrySendError::Closed(_) => debug!(
                        "Dropping frame for session {} ({}): connection closed",
                        session.id(),
                        session.user()
                    ),
                }
                false
            }
        }
    }
}
