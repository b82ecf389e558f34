//! The pair of room services every connection talks to.

use std::sync::Arc;

use studyhall_core::{GroupId, ServerFrame, UserId};

use crate::backend::{MemoryBroker, MemoryPresence};
use crate::broker::{BrokerError, ConnectionId, RoomBroker, RoomEvent};
use crate::presence::PresenceTracker;

/// Room broker plus presence tracker, cheap to clone.
#[derive(Clone)]
pub struct RoomHub {
    broker: Arc<dyn RoomBroker>,
    presence: Arc<dyn PresenceTracker>,
}

impl RoomHub {
    pub fn new(broker: Arc<dyn RoomBroker>, presence: Arc<dyn PresenceTracker>) -> Self {
        Self { broker, presence }
    }

    /// Single-process hub.
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(
            Arc::new(MemoryBroker::new(capacity)),
            Arc::new(MemoryPresence::new()),
        )
    }

    /// Hub shared with other processes through Redis.
    #[cfg(feature = "redis")]
    pub async fn redis(url: &str, capacity: usize) -> Result<Self, BrokerError> {
        use crate::backend::{RedisBroker, RedisPresence};
        Ok(Self::new(
            Arc::new(RedisBroker::connect(url, capacity).await?),
            Arc::new(RedisPresence::connect(url).await?),
        ))
    }

    pub fn broker(&self) -> &Arc<dyn RoomBroker> {
        &self.broker
    }

    pub fn presence(&self) -> &Arc<dyn PresenceTracker> {
        &self.presence
    }

    /// Encode `frame` once and broadcast it to `room`.
    ///
    /// Fire and forget: failures are logged and reported as zero receivers.
    pub async fn publish(&self, room: GroupId, origin: Option<ConnectionId>, frame: &ServerFrame) -> usize {
        match self.try_publish(room, origin, frame).await {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Broadcast to room {room} failed: {e}");
                0
            }
        }
    }

    pub async fn try_publish(
        &self,
        room: GroupId,
        origin: Option<ConnectionId>,
        frame: &ServerFrame,
    ) -> Result<usize, BrokerError> {
        let event = RoomEvent::from_frame(origin, frame)?;
        self.broker.broadcast(room, event).await
    }

    /// Close every connection `user` holds in `room`, on every instance
    /// sharing the broker.
    pub async fn evict(&self, room: GroupId, user: UserId) -> usize {
        match self.broker.broadcast(room, RoomEvent::eviction(user)).await {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Eviction of {user} from room {room} failed: {e}");
                0
            }
        }
    }
}
