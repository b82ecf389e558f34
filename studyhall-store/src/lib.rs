//! Durable group store.
//!
//! ```text
//! ┌──────────────────┐   StoreBatch (atomic)   ┌────────────────────────────────┐
//! │ studyhall-groups │ ──────────────────────► │ GroupStore (RocksDB)           │
//! │ guard / requests │                         │                                │
//! └──────────────────┘                         │ CF "groups"         id         │
//!                                              │ CF "memberships"    group|user │
//!                                              │ CF "join_requests"  id         │
//!                                              │ CF "group_messages" group|id   │
//!                                              └────────────────────────────────┘
//! ```
//!
//! The store knows nothing about capacity or course rules; callers
//! serialize their read-check-write sequences and commit the result as a
//! single [`StoreBatch`].

pub mod rocks;

pub use rocks::{GroupStore, StoreBatch, StoreConfig, StoreError};
