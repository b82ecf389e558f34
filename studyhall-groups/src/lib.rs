//! # studyhall-groups — membership, join requests and messages
//!
//! Business rules over the [`GroupStore`](studyhall_store::GroupStore),
//! independent of any transport:
//!
//! - [`membership`] — admission guard (course uniqueness, capacity), leave,
//!   add/remove, role changes, last-admin protection
//! - [`requests`] — pending → approved / denied for private groups
//! - [`messages`] — persistence, history, soft delete
//! - [`locks`] — per-scope unit-of-work locks
//!
//! Authorization for add, remove, approve, deny and moderation goes
//! through one predicate, [`GroupService::can_manage`].

pub mod locks;
pub mod membership;
pub mod messages;
pub mod requests;
pub mod service;

pub use locks::{LockScope, LockTable};
pub use membership::Admission;
pub use messages::{clamp_history_limit, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
pub use requests::Approval;
pub use service::GroupService;
