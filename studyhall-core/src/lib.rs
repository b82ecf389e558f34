//! # studyhall-core — shared vocabulary for study-group collaboration
//!
//! Everything the other crates agree on lives here:
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ ids / model  │   │ permissions  │   │  protocol    │
//! │ Group, Msg…  │   │ RoleGrant    │   │ JSON frames  │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │                  │                  │
//!        └──────────┬───────┴──────────────────┘
//!                   ▼
//!            GroupError (taxonomy)
//! ```
//!
//! ## Modules
//!
//! - [`ids`] — strongly typed integer identifiers
//! - [`model`] — durable records: groups, memberships, join requests, messages
//! - [`permissions`] — enumerated permission set and role grants
//! - [`identity`] — the external identity directory interface
//! - [`protocol`] — real-time room frames (JSON)
//! - [`error`] — the error taxonomy shared by every operation

pub mod error;
pub mod identity;
pub mod ids;
pub mod model;
pub mod permissions;
pub mod protocol;

pub use error::{GroupError, GroupResult};
pub use identity::{Directory, DirectoryError, StaticDirectory, Viewer};
pub use ids::{CohortId, CourseId, GroupId, MessageId, RequestId, UserId};
pub use model::{
    ChatMessage, Group, GroupMessage, JoinOutcome, JoinRequest, Member, Membership, NewGroup,
    ReplyRef, RequestStatus, Role, MAX_GROUP_NAME_CHARS, MAX_MESSAGE_CHARS,
};
pub use permissions::{Permission, PermissionSet, RoleGrant};
pub use protocol::{ClientFrame, PresenceAction, ProtocolError, ServerFrame};
