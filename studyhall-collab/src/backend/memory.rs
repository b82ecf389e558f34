//! In-process broker and presence for single-instance deployments.
//!
//! Each room owns one tokio broadcast channel, so `broadcast` is one
//! `send` regardless of how many connections listen. Connections and
//! presence entries are mutated under the room's own mutex while the room
//! map is only read-locked; the map write lock is taken to create a room or
//! to drop one that is still empty once the lock is held.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, RwLock};

use studyhall_core::{GroupId, Member, UserId};

use crate::broker::{BrokerError, ConnectionId, RoomBroker, RoomEvent, RoomSubscription};
use crate::presence::PresenceTracker;

/// Fan-out state of one room.
pub struct RoomChannel {
    sender: broadcast::Sender<RoomEvent>,
    connections: Mutex<HashSet<ConnectionId>>,
    events_sent: AtomicU64,
}

impl RoomChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            connections: Mutex::new(HashSet::new()),
            events_sent: AtomicU64::new(0),
        }
    }

    fn attach(&self, conn: ConnectionId) -> RoomSubscription {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conn);
        self.sender.subscribe()
    }

    /// Send without any lock held. Returns the receiver count.
    pub fn send(&self, event: RoomEvent) -> usize {
        let count = self.sender.send(event).unwrap_or(0);
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn events_sent(&self) -> u64 {
        self.events_sent.load(Ordering::Relaxed)
    }
}

/// Room broker backed by per-room broadcast channels.
pub struct MemoryBroker {
    rooms: RwLock<HashMap<GroupId, Arc<RoomChannel>>>,
    capacity: usize,
}

impl MemoryBroker {
    /// `capacity` is how many events a connection may fall behind before
    /// it starts losing them.
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn room(&self, room: GroupId) -> Option<Arc<RoomChannel>> {
        self.rooms.read().await.get(&room).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<GroupId> {
        self.rooms.read().await.keys().copied().collect()
    }
}

#[async_trait]
impl RoomBroker for MemoryBroker {
    async fn register(&self, room: GroupId, conn: ConnectionId) -> Result<RoomSubscription, BrokerError> {
        {
            let rooms = self.rooms.read().await;
            if let Some(channel) = rooms.get(&room) {
                log::debug!("Connection {conn} registered in room {room}");
                return Ok(channel.attach(conn));
            }
        }
        let mut rooms = self.rooms.write().await;
        let channel = rooms.entry(room).or_insert_with(|| {
            log::debug!("Room {room} opened");
            Arc::new(RoomChannel::new(self.capacity))
        });
        log::debug!("Connection {conn} registered in room {room}");
        Ok(channel.attach(conn))
    }

    async fn unregister(&self, room: GroupId, conn: ConnectionId) -> bool {
        let (removed, now_empty) = {
            let rooms = self.rooms.read().await;
            let Some(channel) = rooms.get(&room) else {
                return false;
            };
            let mut connections = channel.connections.lock().unwrap_or_else(|e| e.into_inner());
            (connections.remove(&conn), connections.is_empty())
        };
        if removed {
            log::debug!("Connection {conn} unregistered from room {room}");
        }
        if now_empty {
            // A register may have slipped in between the two locks.
            let mut rooms = self.rooms.write().await;
            if rooms.get(&room).is_some_and(|c| c.connection_count() == 0) {
                rooms.remove(&room);
                log::debug!("Room {room} closed (empty)");
            }
        }
        removed
    }

    async fn broadcast(&self, room: GroupId, event: RoomEvent) -> Result<usize, BrokerError> {
        let channel = self.rooms.read().await.get(&room).cloned();
        Ok(channel.map_or(0, |c| c.send(event)))
    }

    async fn connection_count(&self, room: GroupId) -> usize {
        self.room(room).await.map_or(0, |c| c.connection_count())
    }
}

struct PresenceEntry {
    member: Member,
    connections: usize,
}

type RoomPresence = Mutex<BTreeMap<UserId, PresenceEntry>>;

/// Reference-counted presence sets, one lock per room.
#[derive(Default)]
pub struct MemoryPresence {
    rooms: RwLock<HashMap<GroupId, Arc<RoomPresence>>>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    async fn room(&self, room: GroupId) -> Option<Arc<RoomPresence>> {
        self.rooms.read().await.get(&room).cloned()
    }
}

/// Returns true when this is the member's first open connection.
fn add_connection(presence: &RoomPresence, member: &Member) -> bool {
    let mut entries = presence.lock().unwrap_or_else(|e| e.into_inner());
    let entry = entries.entry(member.id).or_insert_with(|| PresenceEntry {
        member: member.clone(),
        connections: 0,
    });
    entry.connections += 1;
    entry.connections == 1
}

#[async_trait]
impl PresenceTracker for MemoryPresence {
    async fn join(&self, room: GroupId, member: &Member) -> Result<bool, BrokerError> {
        let first = {
            let rooms = self.rooms.read().await;
            rooms.get(&room).map(|presence| add_connection(presence, member))
        };
        let first = match first {
            Some(first) => first,
            None => {
                let mut rooms = self.rooms.write().await;
                add_connection(rooms.entry(room).or_default(), member)
            }
        };
        if first {
            log::info!("Presence: {} ({}) joined room {room}", member.name, member.id);
        }
        Ok(first)
    }

    async fn leave(&self, room: GroupId, member: &Member) -> Result<bool, BrokerError> {
        let (last, room_empty) = {
            let rooms = self.rooms.read().await;
            let Some(presence) = rooms.get(&room) else {
                return Ok(false);
            };
            let mut entries = presence.lock().unwrap_or_else(|e| e.into_inner());
            let last = match entries.get_mut(&member.id) {
                Some(entry) if entry.connections > 1 => {
                    entry.connections -= 1;
                    false
                }
                Some(_) => {
                    entries.remove(&member.id);
                    true
                }
                None => false,
            };
            (last, entries.is_empty())
        };
        if room_empty {
            let mut rooms = self.rooms.write().await;
            let still_empty = rooms
                .get(&room)
                .is_some_and(|p| p.lock().unwrap_or_else(|e| e.into_inner()).is_empty());
            if still_empty {
                rooms.remove(&room);
            }
        }
        if last {
            log::info!("Presence: {} ({}) left room {room}", member.name, member.id);
        }
        Ok(last)
    }

    async fn snapshot(&self, room: GroupId) -> Result<Vec<Member>, BrokerError> {
        let Some(presence) = self.room(room).await else {
            return Ok(Vec::new());
        };
        let entries = presence.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.values().map(|e| e.member.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64, name: &str) -> Member {
        Member::new(UserId(id), name)
    }

    #[tokio::test]
    async fn test_register_broadcast_unregister() {
        let broker = MemoryBroker::new(16);
        let room = GroupId(42);
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        let mut rx_a = broker.register(room, a).await.unwrap();
        let mut rx_b = broker.register(room, b).await.unwrap();
        assert_eq!(broker.connection_count(room).await, 2);

        let count = broker
            .broadcast(room, RoomEvent::new(Some(a), "hello"))
            .await
            .unwrap();
        // Sender's receiver counts too; filtering is the receiver's job.
        assert_eq!(count, 2);
        assert_eq!(&*rx_a.recv().await.unwrap().payload, "hello");
        let got = rx_b.recv().await.unwrap();
        assert!(!got.is_echo_for(b));

        assert!(broker.unregister(room, a).await);
        assert!(!broker.unregister(room, a).await);
        assert_eq!(broker.connection_count(room).await, 1);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let broker = MemoryBroker::new(16);
        let mut rx1 = broker.register(GroupId(1), ConnectionId::new()).await.unwrap();
        let _rx2 = broker.register(GroupId(2), ConnectionId::new()).await.unwrap();

        broker
            .broadcast(GroupId(2), RoomEvent::new(None, "two"))
            .await
            .unwrap();
        assert!(rx1.try_recv().is_err());
        assert_eq!(broker.room_count().await, 2);
    }

    #[tokio::test]
    async fn test_empty_room_is_dropped() {
        let broker = MemoryBroker::new(16);
        let conn = ConnectionId::new();
        let _rx = broker.register(GroupId(7), conn).await.unwrap();
        assert!(broker.unregister(GroupId(7), conn).await);
        assert_eq!(broker.room_count().await, 0);
        assert_eq!(
            broker
                .broadcast(GroupId(7), RoomEvent::new(None, "nobody"))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_order_preserved_per_room() {
        let broker = MemoryBroker::new(64);
        let mut rx = broker.register(GroupId(1), ConnectionId::new()).await.unwrap();
        for i in 0..20 {
            broker
                .broadcast(GroupId(1), RoomEvent::new(None, i.to_string()))
                .await
                .unwrap();
        }
        for i in 0..20 {
            assert_eq!(&*rx.recv().await.unwrap().payload, i.to_string());
        }
        let channel = broker.room(GroupId(1)).await.unwrap();
        assert_eq!(channel.events_sent(), 20);
    }

    #[tokio::test]
    async fn test_slow_receiver_lags_without_blocking() {
        let broker = MemoryBroker::new(4);
        let mut slow = broker.register(GroupId(1), ConnectionId::new()).await.unwrap();
        for i in 0..10 {
            broker
                .broadcast(GroupId(1), RoomEvent::new(None, i.to_string()))
                .await
                .unwrap();
        }
        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[tokio::test]
    async fn test_presence_refcounts_connections() {
        let presence = MemoryPresence::new();
        let room = GroupId(42);
        let ada = member(1, "Ada");

        assert!(presence.join(room, &ada).await.unwrap());
        assert!(!presence.join(room, &ada).await.unwrap());
        assert_eq!(presence.snapshot(room).await.unwrap(), vec![ada.clone()]);

        assert!(!presence.leave(room, &ada).await.unwrap());
        assert_eq!(presence.snapshot(room).await.unwrap().len(), 1);
        assert!(presence.leave(room, &ada).await.unwrap());
        assert!(presence.snapshot(room).await.unwrap().is_empty());

        // Leaving again is a no-op.
        assert!(!presence.leave(room, &ada).await.unwrap());
    }

    #[tokio::test]
    async fn test_presence_snapshot_sorted_by_id() {
        let presence = MemoryPresence::new();
        let room = GroupId(1);
        presence.join(room, &member(3, "Cy")).await.unwrap();
        presence.join(room, &member(1, "Ada")).await.unwrap();
        presence.join(room, &member(2, "Bo")).await.unwrap();
        presence.join(GroupId(2), &member(9, "Zed")).await.unwrap();

        let ids: Vec<u64> = presence
            .snapshot(room)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id.0)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_churn_keeps_rooms_consistent() {
        let broker = Arc::new(MemoryBroker::new(16));
        let presence = Arc::new(MemoryPresence::new());
        let room = GroupId(5);
        let anchor = ConnectionId::new();
        let _rx = broker.register(room, anchor).await.unwrap();
        presence.join(room, &member(1, "Ada")).await.unwrap();

        let mut tasks = Vec::new();
        for id in 2..34u64 {
            let broker = broker.clone();
            let presence = presence.clone();
            tasks.push(tokio::spawn(async move {
                let who = member(id, "guest");
                for _ in 0..25 {
                    let conn = ConnectionId::new();
                    let _rx = broker.register(room, conn).await.unwrap();
                    assert!(presence.join(room, &who).await.unwrap());
                    assert!(presence.leave(room, &who).await.unwrap());
                    assert!(broker.unregister(room, conn).await);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(broker.connection_count(room).await, 1);
        assert_eq!(presence.snapshot(room).await.unwrap(), vec![member(1, "Ada")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rejoin_during_last_leave_is_not_lost() {
        let presence = Arc::new(MemoryPresence::new());
        let room = GroupId(6);
        let mut tasks = Vec::new();
        for id in 1..17u64 {
            let presence = presence.clone();
            tasks.push(tokio::spawn(async move {
                let who = member(id, "solo");
                for _ in 0..50 {
                    presence.join(room, &who).await.unwrap();
                    presence.leave(room, &who).await.unwrap();
                }
                presence.join(room, &who).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(presence.snapshot(room).await.unwrap().len(), 16);
    }
}
