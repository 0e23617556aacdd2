//! Transport handles for accepted connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use conduit_core::{ConnectionId, HandshakeAttributes, Transport, TransportError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// A WebSocket connection accepted by this node.
///
/// Outbound text goes through a bounded queue drained by the socket's write
/// task. Closing cancels a token the write task watches, so a close request
/// is never stuck behind a full queue.
pub struct ClientConnection {
    /// Node-unique connection id.
    pub id: ConnectionId,
    attributes: HandshakeAttributes,
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last ping.
    pub is_alive: AtomicBool,
    /// When the last pong (or any inbound frame) was received.
    last_pong: Mutex<Instant>,
    closed: CancellationToken,
    /// Frames dropped because the outbound queue was full.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection that writes into `tx`.
    pub fn new(
        id: ConnectionId,
        attributes: HandshakeAttributes,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            attributes,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            closed: CancellationToken::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Whether [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection has been asked to close.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

impl Transport for ClientConnection {
    fn underlying_connection_id(&self) -> Option<ConnectionId> {
        Some(self.id.clone())
    }

    fn attributes(&self) -> &HandshakeAttributes {
        &self.attributes
    }

    fn send_text(&self, text: Arc<String>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        match self.tx.try_send(text) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.closed.cancel();
        Ok(())
    }
}

/// A session that reaches its socket through a relay layer.
///
/// This is the seam for relayed (SockJS-style) transports: the built-in
/// WebSocket route hands [`ClientConnection`]s to the lifecycle directly, and
/// a relay front end wraps its bound connection in this type instead. The
/// lifecycle controller treats a bound session exactly like the connection
/// it wraps.
///
/// The relay may not have bound a socket yet, in which case there is no
/// underlying connection to register and the lifecycle controller rejects
/// the handle.
pub struct SockJsSession {
    inner: Option<Arc<ClientConnection>>,
    attributes: HandshakeAttributes,
}

impl SockJsSession {
    /// Wrap a bound connection. The session shares the connection's
    /// handshake attributes.
    pub fn bound(inner: Arc<ClientConnection>) -> Self {
        let attributes = inner.attributes().clone();
        Self {
            inner: Some(inner),
            attributes,
        }
    }

    /// A session whose socket is not bound.
    pub fn unbound(attributes: HandshakeAttributes) -> Self {
        Self {
            inner: None,
            attributes,
        }
    }
}

impl Transport for SockJsSession {
    fn underlying_connection_id(&self) -> Option<ConnectionId> {
        self.inner.as_ref().map(|c| c.id.clone())
    }

    fn attributes(&self) -> &HandshakeAttributes {
        &self.attributes
    }

    fn send_text(&self, text: Arc<String>) -> Result<(), TransportError> {
        self.inner
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send_text(text)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.inner.as_ref().ok_or(TransportError::Closed)?.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let attrs = HandshakeAttributes::new().with("token", "tok-1");
        let conn = ClientConnection::new(ConnectionId::from("c1"), attrs, tx);
        (conn, rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id.as_str(), "c1");
        assert_eq!(conn.underlying_connection_id().as_deref(), Some("c1"));
        assert_eq!(conn.attributes().token(), Some("tok-1"));
        assert!(conn.is_alive.load(Ordering::Relaxed));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn send_text_reaches_queue() {
        let (conn, mut rx) = make_connection();
        conn.send_text(Arc::new("hello".into())).unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
    }

    #[test]
    fn full_queue_counts_drop() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::from("c2"), HandshakeAttributes::new(), tx);
        conn.send_text(Arc::new("msg1".into())).unwrap();
        assert_eq!(
            conn.send_text(Arc::new("msg2".into())),
            Err(TransportError::QueueFull)
        );
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let (tx, rx) = mpsc::channel(4);
        let conn = ClientConnection::new(ConnectionId::from("c3"), HandshakeAttributes::new(), tx);
        drop(rx);
        assert_eq!(
            conn.send_text(Arc::new("x".into())),
            Err(TransportError::Closed)
        );
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn close_twice_is_error() {
        let (conn, _rx) = make_connection();
        assert!(conn.close().is_ok());
        assert!(conn.is_closed());
        conn.closed().await;
        assert_eq!(conn.close(), Err(TransportError::Closed));
        assert_eq!(
            conn.send_text(Arc::new("late".into())),
            Err(TransportError::Closed)
        );
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx) = make_connection();
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn connection_age_increases() {
        let (conn, _rx) = make_connection();
        let age1 = conn.age();
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.age() > age1);
        assert!(conn.last_pong_elapsed() >= Duration::from_millis(10));
    }

    // ── SockJsSession ───────────────────────────────────────────────

    #[tokio::test]
    async fn bound_session_delegates() {
        let (conn, mut rx) = make_connection();
        let conn = Arc::new(conn);
        let session = SockJsSession::bound(Arc::clone(&conn));
        assert_eq!(session.underlying_connection_id().as_deref(), Some("c1"));
        assert_eq!(session.attributes().token(), Some("tok-1"));

        session.send_text(Arc::new("via relay".into())).unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "via relay");

        session.close().unwrap();
        assert!(conn.is_closed());
    }

    #[test]
    fn unbound_session_has_no_connection() {
        let session = SockJsSession::unbound(HandshakeAttributes::new().with("token", "t"));
        assert!(session.underlying_connection_id().is_none());
        assert_eq!(session.attributes().token(), Some("t"));
        assert_eq!(session.close(), Err(TransportError::Closed));
        assert_eq!(
            session.send_text(Arc::new("x".into())),
            Err(TransportError::Closed)
        );
    }
}
