//! Connection sessions
//!
//! A [`Session`] is the hub-facing half of one client connection. The
//! connection task owns the socket; the session only holds the bounded
//! outbound queue that feeds it, so any task may call [`Session::send`] or
//! [`Session::close`] without touching the socket directly.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use crate::hub::{DispatchOutcome, RegisterError, RelayHub};
use crate::protocol::{DecodeError, Envelope};
use didrelay_observability::RelayMetrics;

/// A handle to a session for external reference
pub type SessionHandle = Arc<Session>;

/// Observable lifecycle of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, no identifier claimed yet
    Unbound,
    /// Last claimed identifier
    Registered(String),
    /// Terminal
    Closed,
}

/// One live client connection
#[derive(Debug)]
pub struct Session {
    /// Connection ID
    id: String,
    /// Remote address, when the transport reports one
    peer: Option<SocketAddr>,
    /// Accept time
    connected_at: DateTime<Utc>,
    /// Identifier last registered by this connection
    identifier: RwLock<Option<String>>,
    /// Cleared by the first close
    open: AtomicBool,
    /// Set once teardown has run
    finished: AtomicBool,
    /// Frames waiting for the connection task
    sender: mpsc::Sender<String>,
    /// Wakes the connection task to send a close frame
    close_signal: Notify,
}

impl Session {
    /// Create a session and the receiving end of its outbound queue.
    ///
    /// At most `queue_capacity` frames (minimum one) may wait for the socket.
    pub fn new(
        peer: Option<SocketAddr>,
        queue_capacity: usize,
    ) -> (SessionHandle, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let session = Self {
            id: Uuid::new_v4().to_string(),
            peer,
            connected_at: Utc::now(),
            identifier: RwLock::new(None),
            open: AtomicBool::new(true),
            finished: AtomicBool::new(false),
            sender,
            close_signal: Notify::new(),
        };
        (Arc::new(session), receiver)
    }

    /// Connection ID, unique per accepted stream
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote address of the connection
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// When the connection was accepted
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Identifier this session last registered under, if any
    pub fn identifier(&self) -> Option<String> {
        self.identifier.read().clone()
    }

    /// Bind an identifier, returning the one previously held
    pub(crate) fn bind(&self, identifier: &str) -> Option<String> {
        self.identifier.write().replace(identifier.to_string())
    }

    /// Whether frames can still be queued for this session
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        if !self.is_open() {
            return SessionState::Closed;
        }
        match self.identifier() {
            Some(identifier) => SessionState::Registered(identifier),
            None => SessionState::Unbound,
        }
    }

    /// Queue a frame for delivery without waiting.
    ///
    /// Fails without side effects on a closed session. A queue whose
    /// connection task is gone marks the session closed. A full queue is
    /// reported as [`SessionError::QueueFull`]; the frame is not queued.
    pub fn send(&self, frame: impl Into<String>) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::Closed);
        }
        self.sender.try_send(frame.into()).map_err(|e| match e {
            TrySendError::Full(_) => SessionError::QueueFull,
            TrySendError::Closed(_) => {
                self.open.store(false, Ordering::Release);
                SessionError::Closed
            }
        })
    }

    /// Ask the connection task to close the stream.
    ///
    /// Returns `true` only for the call that actually closed the session.
    pub fn close(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        if was_open {
            self.close_signal.notify_one();
        }
        was_open
    }

    /// Resolves once [`Session::close`] has been called
    pub(crate) async fn close_requested(&self) {
        self.close_signal.notified().await
    }

    /// Decode one inbound frame and hand it to the hub.
    ///
    /// Decode errors are counted and returned; they never close the session.
    pub fn on_message(
        self: &Arc<Self>,
        hub: &RelayHub,
        raw: &[u8],
    ) -> Result<DispatchOutcome, SessionError> {
        let envelope = Envelope::decode(raw).map_err(|e| {
            RelayMetrics::record_decode_error();
            SessionError::Decode(e)
        })?;
        Ok(hub.dispatch(self, envelope)?)
    }

    /// Tear down after the stream has ended.
    ///
    /// Only the first call does anything; it marks the session closed and
    /// removes its routing entry if that entry still points here.
    pub fn on_close(self: &Arc<Self>, hub: &RelayHub) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.open.store(false, Ordering::Release);

        let removed = hub.unregister(self);
        match self.identifier() {
            Some(identifier) if removed => info!("Disconnected: {}", identifier),
            Some(identifier) => debug!("Disconnected: {} (no longer routed here)", identifier),
            None => debug!("Disconnected unregistered session {}", self.id),
        }
        true
    }
}

/// Session-related errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session closed")]
    Closed,
    #[error("Outbound queue full")]
    QueueFull,
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Registration rejected: {0}")]
    Register(#[from] RegisterError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_send_queues_frame() {
        let (session, mut outbound) = Session::new(None, 4);
        session.send(r#"{"to":"did:B","payload":1}"#).unwrap();

        assert_eq!(outbound.try_recv().unwrap(), r#"{"to":"did:B","payload":1}"#);
    }

    #[test]
    fn test_full_queue_rejects_without_closing() {
        let (session, mut outbound) = Session::new(None, 2);
        session.send("one").unwrap();
        session.send("two").unwrap();

        assert!(matches!(session.send("three"), Err(SessionError::QueueFull)));
        assert!(session.is_open());

        assert_eq!(outbound.try_recv().unwrap(), "one");
        assert_eq!(outbound.try_recv().unwrap(), "two");
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, mut outbound) = Session::new(None, 4);

        assert!(session.close());
        assert!(!session.close());
        assert_eq!(session.state(), SessionState::Closed);

        tokio::time::timeout(Duration::from_secs(1), session.close_requested())
            .await
            .unwrap();
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_signal_survives_full_queue() {
        let (session, _outbound) = Session::new(None, 1);
        session.send("backlog").unwrap();

        assert!(session.close());
        tokio::time::timeout(Duration::from_secs(1), session.close_requested())
            .await
            .unwrap();
    }

    #[test]
    fn test_send_after_close_fails() {
        let (session, mut outbound) = Session::new(None, 4);
        session.close();

        assert!(matches!(session.send("late"), Err(SessionError::Closed)));
        assert!(outbound.try_recv().is_err());
    }

    #[test]
    fn test_dropped_connection_task_closes_session() {
        let (session, outbound) = Session::new(None, 4);
        drop(outbound);

        assert!(!session.is_open());
        assert!(matches!(session.send("frame"), Err(SessionError::Closed)));
    }

    #[test]
    fn test_state_transitions() {
        let hub = RelayHub::new();
        let (session, _outbound) = Session::new(None, 4);
        assert_eq!(session.state(), SessionState::Unbound);

        session
            .on_message(&hub, br#"{"type":"register","did":"did:A"}"#)
            .unwrap();
        assert_eq!(
            session.state(),
            SessionState::Registered("did:A".to_string())
        );

        assert!(session.on_close(&hub));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_on_close_runs_once() {
        let hub = RelayHub::new();
        let (session, _outbound) = Session::new(None, 4);
        session
            .on_message(&hub, br#"{"type":"register","did":"did:A"}"#)
            .unwrap();

        assert!(session.on_close(&hub));
        assert!(hub.lookup("did:A").is_none());
        assert!(!session.on_close(&hub));
    }

    #[test]
    fn test_decode_error_keeps_session_open() {
        let hub = RelayHub::new();
        let (session, _outbound) = Session::new(None, 4);

        let err = session.on_message(&hub, b"{not json").unwrap_err();
        assert!(matches!(err, SessionError::Decode(DecodeError::Json(_))));
        assert!(session.is_open());

        session
            .on_message(&hub, br#"{"type":"register","did":"did:A"}"#)
            .unwrap();
        assert!(hub.lookup("did:A").is_some());
    }
}
