//! Live client sessions.
//!
//! A [`Session`] is the engine's view of one WebSocket connection: an
//! authenticated user plus a bounded outbound queue drained by the socket's
//! writer task. The transport owns the connection; the registry and feeds only
//! hold `Arc<Session>` references to push frames into the queue.

use crate::error::{GatewayError, Result};
use axum::extract::ws::Message;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Unique session identifier.
pub type SessionId = Uuid;

/// Default buffer size for session outbound queues.
/// Sized for a few minutes of 5 s ticks across a large watchlist.
pub const SESSION_CHANNEL_BUFFER_SIZE: usize = 1000;

/// State for a single connected session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    user: String,
    /// Bounded so a slow client cannot grow memory without limit.
    tx: mpsc::Sender<Message>,
    /// Millis timestamp of the last frame received from the client.
    last_seen: AtomicI64,
}

impl Session {
    /// Create a session writing into `tx`.
    pub fn new(user: impl Into<String>, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            tx,
            last_seen: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    /// Create a session together with the receiving end of its queue.
    pub fn channel(
        user: impl Into<String>,
        buffer: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Arc::new(Self::new(user, tx)), rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Username this session was authenticated as.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Queue a text frame. Never blocks; fails if the queue is full or the
    /// writer has gone away.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.tx
            .try_send(Message::Text(text.into().into()))
            .map_err(GatewayError::from)
    }

    /// Queue a raw frame. Returns false if it could not be queued.
    pub fn try_send_raw(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Queue a raw frame, reporting why it was refused.
    pub fn try_send_message(&self, msg: Message) -> std::result::Result<(), TrySendError<Message>> {
        self.tx.try_send(msg)
    }

    /// True once the writer side of the connection has shut down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Record that the client just sent something.
    pub fn touch(&self) {
        self.touch_at(Utc::now().timestamp_millis());
    }

    fn touch_at(&self, now_ms: i64) {
        self.last_seen.fetch_max(now_ms, Ordering::Relaxed);
    }

    /// True if nothing arrived from the client within `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.is_stale_at(Utc::now().timestamp_millis(), timeout)
    }

    fn is_stale_at(&self, now_ms: i64, timeout: Duration) -> bool {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.last_seen.load(Ordering::Relaxed)) > timeout_ms
    }
}
