//! Redis pub/sub backend for running several gateway processes.
//!
//! ```text
//!  process A                         redis                        process B
//!  broadcast(room 7) ── PUBLISH studyhall:room:7 ──▶ PSUBSCRIBE studyhall:room:* ──▶ local fan-out
//! ```
//!
//! Every process keeps a [`MemoryBroker`] for its own connections and one
//! pattern subscription that feeds it. A broadcast is only ever delivered
//! through the subscription, so local and remote connections see the same
//! order.
//!
//! Presence lives in two hashes per room: `…:counts` (user → open
//! connections across all processes) and `…:names` (user → display name).
//! Both hashes change together inside one server-side script, so two
//! processes joining and leaving the same user cannot interleave between
//! the count and the name.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use studyhall_core::{GroupId, Member, UserId};

use super::memory::MemoryBroker;
use crate::broker::{BrokerError, ConnectionId, RoomBroker, RoomEvent, RoomSubscription};
use crate::presence::PresenceTracker;

const ROOM_CHANNEL_PREFIX: &str = "studyhall:room:";
const PRESENCE_PREFIX: &str = "studyhall:presence:";

// KEYS[1] counts, KEYS[2] names; ARGV[1] user id, ARGV[2] display name.
const JOIN_SCRIPT: &str = r"
local n = redis.call('HINCRBY', KEYS[1], ARGV[1], 1)
if n == 1 then
  redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
end
return n
";

const LEAVE_SCRIPT: &str = r"
local n = redis.call('HINCRBY', KEYS[1], ARGV[1], -1)
if n <= 0 then
  redis.call('HDEL', KEYS[1], ARGV[1])
  redis.call('HDEL', KEYS[2], ARGV[1])
end
return n
";

impl From<redis::RedisError> for BrokerError {
    fn from(e: redis::RedisError) -> Self {
        BrokerError::Backend(e.to_string())
    }
}

fn room_channel(room: GroupId) -> String {
    format!("{ROOM_CHANNEL_PREFIX}{room}")
}

fn room_from_channel(channel: &str) -> Option<GroupId> {
    channel
        .strip_prefix(ROOM_CHANNEL_PREFIX)?
        .parse::<u64>()
        .ok()
        .map(GroupId)
}

/// What travels over the wire between processes.
#[derive(Serialize, Deserialize)]
struct Relay {
    origin: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    evict: Option<u64>,
    payload: String,
}

impl Relay {
    fn from_event(event: &RoomEvent) -> Self {
        Self {
            origin: event.origin.map(|c| c.0),
            evict: event.evict.map(|u| u.0),
            payload: event.payload.to_string(),
        }
    }

    fn into_event(self) -> RoomEvent {
        match self.evict {
            Some(user) => RoomEvent::eviction(UserId(user)),
            None => RoomEvent::new(self.origin.map(ConnectionId), self.payload),
        }
    }
}

/// Broker that relays every broadcast through Redis.
pub struct RedisBroker {
    local: Arc<MemoryBroker>,
    publisher: MultiplexedConnection,
}

impl RedisBroker {
    /// Connect, subscribe to all room channels and start the relay task.
    pub async fn connect(url: &str, capacity: usize) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(format!("{ROOM_CHANNEL_PREFIX}*")).await?;

        let local = Arc::new(MemoryBroker::new(capacity));
        let relay_target = local.clone();
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let Some(room) = room_from_channel(msg.get_channel_name()) else {
                    continue;
                };
                let relay = msg
                    .get_payload::<String>()
                    .map_err(|e| e.to_string())
                    .and_then(|raw| serde_json::from_str::<Relay>(&raw).map_err(|e| e.to_string()));
                match relay {
                    Ok(relay) => {
                        let _ = relay_target.broadcast(room, relay.into_event()).await;
                    }
                    Err(e) => log::warn!("Dropping malformed relay for room {room}: {e}"),
                }
            }
            log::error!("Redis room subscription ended; cross-process fan-out stopped");
        });

        log::info!("Redis broker connected to {url}");
        Ok(Self { local, publisher })
    }
}

#[async_trait]
impl RoomBroker for RedisBroker {
    async fn register(&self, room: GroupId, conn: ConnectionId) -> Result<RoomSubscription, BrokerError> {
        self.local.register(room, conn).await
    }

    async fn unregister(&self, room: GroupId, conn: ConnectionId) -> bool {
        self.local.unregister(room, conn).await
    }

    async fn broadcast(&self, room: GroupId, event: RoomEvent) -> Result<usize, BrokerError> {
        let encoded = serde_json::to_string(&Relay::from_event(&event)).map_err(|e| BrokerError::Encode(e.to_string()))?;
        let mut conn = self.publisher.clone();
        let receivers: usize = conn.publish(room_channel(room), encoded).await?;
        Ok(receivers)
    }

    async fn connection_count(&self, room: GroupId) -> usize {
        self.local.connection_count(room).await
    }
}

/// Presence shared by every process through Redis hashes.
pub struct RedisPresence {
    conn: MultiplexedConnection,
    join_script: redis::Script,
    leave_script: redis::Script,
}

impl RedisPresence {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            join_script: redis::Script::new(JOIN_SCRIPT),
            leave_script: redis::Script::new(LEAVE_SCRIPT),
        })
    }

    fn keys(room: GroupId) -> (String, String) {
        (
            format!("{PRESENCE_PREFIX}{room}:counts"),
            format!("{PRESENCE_PREFIX}{room}:names"),
        )
    }
}

#[async_trait]
impl PresenceTracker for RedisPresence {
    async fn join(&self, room: GroupId, member: &Member) -> Result<bool, BrokerError> {
        let (counts, names) = Self::keys(room);
        let mut conn = self.conn.clone();
        let open: i64 = self
            .join_script
            .key(&counts)
            .key(&names)
            .arg(member.id.0)
            .arg(&member.name)
            .invoke_async(&mut conn)
            .await?;
        if open == 1 {
            log::info!("Presence: {} ({}) joined room {room}", member.name, member.id);
        }
        Ok(open == 1)
    }

    async fn leave(&self, room: GroupId, member: &Member) -> Result<bool, BrokerError> {
        let (counts, names) = Self::keys(room);
        let mut conn = self.conn.clone();
        let open: i64 = self
            .leave_script
            .key(&counts)
            .key(&names)
            .arg(member.id.0)
            .invoke_async(&mut conn)
            .await?;
        if open == 0 {
            log::info!("Presence: {} ({}) left room {room}", member.name, member.id);
        }
        // Negative means the user was not present.
        Ok(open == 0)
    }

    async fn snapshot(&self, room: GroupId) -> Result<Vec<Member>, BrokerError> {
        let (_, names) = Self::keys(room);
        let mut conn = self.conn.clone();
        let raw: HashMap<u64, String> = conn.hgetall(&names).await?;
        let mut members: Vec<Member> = raw
            .into_iter()
            .map(|(id, name)| Member::new(UserId(id), name))
            .collect();
        members.sort_by_key(|m| m.id);
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(room_channel(GroupId(42)), "studyhall:room:42");
        assert_eq!(room_from_channel("studyhall:room:42"), Some(GroupId(42)));
        assert_eq!(room_from_channel("studyhall:room:x"), None);
        assert_eq!(room_from_channel("other:42"), None);
    }

    #[test]
    fn test_relay_roundtrip_keeps_origin() {
        let origin = Uuid::new_v4();
        let raw = serde_json::to_string(&Relay {
            origin: Some(origin),
            evict: None,
            payload: r#"{"type":"typing"}"#.into(),
        })
        .unwrap();
        assert!(!raw.contains("evict"));
        let relay: Relay = serde_json::from_str(&raw).unwrap();
        assert_eq!(relay.origin, Some(origin));
        assert_eq!(relay.payload, r#"{"type":"typing"}"#);
    }

    #[test]
    fn test_relay_carries_eviction() {
        let raw = serde_json::to_string(&Relay::from_event(&RoomEvent::eviction(UserId(9)))).unwrap();
        let event = serde_json::from_str::<Relay>(&raw).unwrap().into_event();
        assert_eq!(event.evict, Some(UserId(9)));
        assert!(event.origin.is_none());
    }

    // Live tests need a Redis server:
    // STUDYHALL_TEST_REDIS_URL=redis://127.0.0.1/ cargo test -p studyhall-collab --features redis -- --ignored

    fn redis_url() -> String {
        std::env::var("STUDYHALL_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into())
    }

    /// A room id no other run has used.
    fn fresh_room() -> GroupId {
        GroupId(Uuid::new_v4().as_u128() as u64 >> 1)
    }

    #[tokio::test]
    #[ignore = "needs a running Redis server"]
    async fn test_presence_is_shared_and_refcounted_across_processes() {
        let a = RedisPresence::connect(&redis_url()).await.unwrap();
        let b = RedisPresence::connect(&redis_url()).await.unwrap();
        let room = fresh_room();
        let ada = Member::new(UserId(1), "Ada");

        assert!(a.join(room, &ada).await.unwrap());
        assert!(!b.join(room, &ada).await.unwrap());
        assert_eq!(b.snapshot(room).await.unwrap(), vec![ada.clone()]);

        assert!(!a.leave(room, &ada).await.unwrap());
        assert_eq!(a.snapshot(room).await.unwrap(), vec![ada.clone()]);
        assert!(b.leave(room, &ada).await.unwrap());
        assert!(a.snapshot(room).await.unwrap().is_empty());

        // A stray leave neither reports a departure nor leaves a negative count.
        assert!(!a.leave(room, &ada).await.unwrap());
        assert!(b.join(room, &ada).await.unwrap());
        assert!(a.leave(room, &ada).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "needs a running Redis server"]
    async fn test_interleaved_join_leave_keeps_name_and_count_together() {
        let a = Arc::new(RedisPresence::connect(&redis_url()).await.unwrap());
        let b = Arc::new(RedisPresence::connect(&redis_url()).await.unwrap());
        let room = fresh_room();
        let bo = Member::new(UserId(2), "Bo");

        let mut tasks = Vec::new();
        for presence in [a.clone(), b.clone()] {
            let bo = bo.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    presence.join(room, &bo).await.unwrap();
                    presence.leave(room, &bo).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(a.snapshot(room).await.unwrap().is_empty());

        a.join(room, &bo).await.unwrap();
        assert_eq!(b.snapshot(room).await.unwrap(), vec![bo.clone()]);
        a.leave(room, &bo).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a running Redis server"]
    async fn test_broadcast_and_eviction_reach_other_process() {
        let a = RedisBroker::connect(&redis_url(), 16).await.unwrap();
        let b = RedisBroker::connect(&redis_url(), 16).await.unwrap();
        let room = fresh_room();
        let mut on_b = b.register(room, ConnectionId::new()).await.unwrap();

        let origin = ConnectionId::new();
        a.broadcast(room, RoomEvent::new(Some(origin), "hello")).await.unwrap();
        a.broadcast(room, RoomEvent::eviction(UserId(3))).await.unwrap();

        let wait = std::time::Duration::from_secs(3);
        let first = tokio::time::timeout(wait, on_b.recv()).await.unwrap().unwrap();
        assert_eq!(&*first.payload, "hello");
        assert!(first.is_echo_for(origin));
        let second = tokio::time::timeout(wait, on_b.recv()).await.unwrap().unwrap();
        assert_eq!(second.evict, Some(UserId(3)));
    }
}
