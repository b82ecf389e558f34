//! Broker and presence backends.
//!
//! - [`memory`] — single process, tokio broadcast channels
//! - `redis` — several processes sharing Redis pub/sub (feature `redis`)

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use self::memory::{MemoryBroker, MemoryPresence, RoomChannel};
#[cfg(feature = "redis")]
pub use self::redis::{RedisBroker, RedisPresence};
