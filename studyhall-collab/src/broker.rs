//! Room broker: fan-out of room events to every registered connection.
//!
//! One room per group, addressed by [`GroupId`]. The gateway depends only
//! on [`RoomBroker`]; the backend decides whether fan-out stays in this
//! process ([`MemoryBroker`](crate::backend::MemoryBroker)) or goes through
//! an external pub/sub layer.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use studyhall_core::{GroupId, ProtocolError, ServerFrame, UserId};

/// Identity of one live connection. A user with two tabs has two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A pre-encoded server frame on its way through a room.
///
/// Frames are serialized once per broadcast, not once per recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomEvent {
    /// Connection the event came from; it will not be echoed back to it.
    /// `None` reaches everyone.
    pub origin: Option<ConnectionId>,
    /// Set on control events that tell every connection of this user to
    /// close. Such events carry no payload for clients.
    pub evict: Option<UserId>,
    pub payload: Arc<str>,
}

impl RoomEvent {
    pub fn new(origin: Option<ConnectionId>, payload: impl Into<Arc<str>>) -> Self {
        Self {
            origin,
            evict: None,
            payload: payload.into(),
        }
    }

    /// Control event closing the room for `user`.
    pub fn eviction(user: UserId) -> Self {
        Self {
            origin: None,
            evict: Some(user),
            payload: Arc::from(""),
        }
    }

    pub fn from_frame(origin: Option<ConnectionId>, frame: &ServerFrame) -> Result<Self, ProtocolError> {
        Ok(Self::new(origin, frame.encode()?))
    }

    /// Whether `conn` should skip this event.
    pub fn is_echo_for(&self, conn: ConnectionId) -> bool {
        self.origin == Some(conn)
    }
}

/// Receiving side handed to a registered connection.
///
/// Each connection buffers independently; a slow reader lags instead of
/// blocking the room.
pub type RoomSubscription = broadcast::Receiver<RoomEvent>;

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("broker backend unavailable: {0}")]
    Backend(String),
    #[error("failed to encode room event: {0}")]
    Encode(String),
}

impl From<ProtocolError> for BrokerError {
    fn from(e: ProtocolError) -> Self {
        BrokerError::Encode(e.to_string())
    }
}

#[async_trait]
pub trait RoomBroker: Send + Sync {
    /// Attach `conn` to `room` and return its event stream.
    async fn register(&self, room: GroupId, conn: ConnectionId) -> Result<RoomSubscription, BrokerError>;

    /// Detach `conn`. Returns `false` if it was not registered, so calling
    /// twice is harmless.
    async fn unregister(&self, room: GroupId, conn: ConnectionId) -> bool;

    /// Deliver `event` to every connection registered under `room`.
    ///
    /// Returns how many receivers accepted it (local connections, or
    /// subscribed processes for an external backend).
    async fn broadcast(&self, room: GroupId, event: RoomEvent) -> Result<usize, BrokerError>;

    /// Connections registered under `room` in this process.
    async fn connection_count(&self, room: GroupId) -> usize;
}
