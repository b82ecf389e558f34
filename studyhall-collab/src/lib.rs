//! # studyhall-collab — real-time group rooms
//!
//! One room per group. Members connect over WebSocket, see who else is
//! there, get typing indicators and receive chat as soon as it is stored.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket     ┌─────────────┐   post_message   ┌──────────────┐
//! │ RoomClient  │ ◄───────────────► │  Gateway    │ ───────────────► │ GroupService │
//! │ (per tab)   │    JSON frames    │ (per conn   │                  │  (durable)   │
//! └─────────────┘                   │   task)     │                  └──────────────┘
//!                                   └──────┬──────┘
//!                                          │ Messenger: persist, then publish
//!                                   ┌──────┴──────────────────────┐
//!                                   │ RoomHub                     │
//!                                   │  RoomBroker      (fan-out)  │
//!                                   │  PresenceTracker (who's in) │
//!                                   └──────┬──────────────────────┘
//!                                          │
//!                         memory (one process) | redis (feature `redis`)
//! ```
//!
//! ## Modules
//!
//! - [`broker`] — room fan-out interface and event envelope
//! - [`presence`] — reference-counted presence interface
//! - [`backend`] — in-memory and Redis implementations
//! - [`hub`] — broker and presence bundled for sharing
//! - [`messenger`] — persist-then-broadcast chat path
//! - [`gateway`] — WebSocket connection lifecycle
//! - [`client`] — WebSocket room client
//! - [`config`] — gateway settings

pub mod backend;
pub mod broker;
pub mod client;
pub mod config;
pub mod gateway;
pub mod hub;
pub mod messenger;
pub mod presence;

pub use backend::{MemoryBroker, MemoryPresence, RoomChannel};
#[cfg(feature = "redis")]
pub use backend::{RedisBroker, RedisPresence};
pub use broker::{BrokerError, ConnectionId, RoomBroker, RoomEvent, RoomSubscription};
pub use client::{ClientEvent, ConnectionState, RoomClient};
pub use config::GatewayConfig;
pub use gateway::{Gateway, RoomTarget, TargetError};
pub use hub::RoomHub;
pub use messenger::Messenger;
pub use presence::PresenceTracker;
