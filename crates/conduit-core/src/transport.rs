//! Live transport handle of one connection.
//!
//! Both the direct WebSocket connection and the SockJS-style wrapper expose
//! this capability, so the lifecycle controller never needs to know which
//! one it was handed.

use std::sync::Arc;

use crate::attributes::HandshakeAttributes;
use crate::ids::ConnectionId;

/// Errors raised by a transport handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection is already closed.
    #[error("transport closed")]
    Closed,
    /// The outbound queue is full; the frame was dropped.
    #[error("outbound queue full")]
    QueueFull,
}

/// Capability set of a live connection.
pub trait Transport: Send + Sync {
    /// Id of the underlying socket connection.
    ///
    /// `None` means the handle wraps something this node does not recognize;
    /// such a connection is rejected.
    fn underlying_connection_id(&self) -> Option<ConnectionId>;

    /// Handshake attributes captured at upgrade time.
    fn attributes(&self) -> &HandshakeAttributes;

    /// Queue a text frame for delivery.
    fn send_text(&self, text: Arc<String>) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is an error, never a panic.
    fn close(&self) -> Result<(), TransportError>;
}
