//! Transport contract
//!
//! Peer discovery and message delivery live outside this crate. A transport
//! carries opaque payloads at most once, in no particular order, and reports
//! session and peer changes through a [`TransportEvent`] channel handed to
//! the coordinator alongside it.

mod memory;
mod session_code;

use std::collections::BTreeSet;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::{MemoryHub, MemoryTransport};
pub use session_code::SessionCode;

/// Transport-related errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected to a session")]
    NotConnected,

    #[error("Already connected to a session")]
    AlreadyConnected,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transport closed")]
    Closed,
}

/// Notifications from the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Session id appeared (connected) or vanished (disconnected)
    SessionChanged(Option<String>),
    /// Everyone else currently in the session
    PeersChanged(BTreeSet<String>),
    /// Payload from another peer
    Message { from: String, payload: Vec<u8> },
}

/// Receiving half for [`TransportEvent`]s
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Message channel between peers of one session
pub trait Transport: Send + Sync {
    /// `None` creates a session as host, `Some(code)` joins one.
    /// Completion does not mean the session is up; watch for `SessionChanged`.
    fn connect(&self, code: Option<String>) -> BoxFuture<'_, Result<(), TransportError>>;

    fn disconnect(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Fire-and-forget delivery to every other peer in the session
    fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}
