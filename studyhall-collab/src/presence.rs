//! Presence tracker: who is connected to each room right now.
//!
//! Entries are reference counted per user so several connections of one
//! user (tabs, devices) produce a single `join` and a single `leave`.
//! Nothing here is persisted; presence is rebuilt from live connections.

use async_trait::async_trait;

use studyhall_core::{GroupId, Member};

use crate::broker::BrokerError;

#[async_trait]
pub trait PresenceTracker: Send + Sync {
    /// Record one more connection of `member`. `true` when the user was
    /// not present before.
    async fn join(&self, room: GroupId, member: &Member) -> Result<bool, BrokerError>;

    /// Drop one connection of `member`. `true` when it was the last one.
    async fn leave(&self, room: GroupId, member: &Member) -> Result<bool, BrokerError>;

    /// Present users, ordered by id.
    async fn snapshot(&self, room: GroupId) -> Result<Vec<Member>, BrokerError>;
}
