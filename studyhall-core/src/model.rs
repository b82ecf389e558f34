//! Durable records of the group store and the views built from them.
//!
//! Four record kinds are persisted: [`Group`], [`Membership`],
//! [`JoinRequest`] and [`GroupMessage`]. [`Member`] is the ephemeral
//! presence identity and is never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GroupError;
use crate::ids::{CohortId, CourseId, GroupId, MessageId, RequestId, UserId};

/// Longest accepted group name, in characters.
pub const MAX_GROUP_NAME_CHARS: usize = 120;

/// Longest accepted message body, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// A study group.
///
/// `max_members` is checked at join time only; editing a group never
/// evicts anyone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub cohort: CohortId,
    pub course: Option<CourseId>,
    pub created_by: UserId,
    pub is_private: bool,
    pub max_members: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for group creation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cohort: CohortId,
    #[serde(default)]
    pub course: Option<CourseId>,
    #[serde(default)]
    pub is_private: bool,
    pub max_members: u32,
}

impl NewGroup {
    /// Reject blank or oversized names and zero capacity.
    pub fn validate(&self) -> Result<(), GroupError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(GroupError::Validation("group name is required".into()));
        }
        if name.chars().count() > MAX_GROUP_NAME_CHARS {
            return Err(GroupError::Validation(format!(
                "group name exceeds {MAX_GROUP_NAME_CHARS} characters"
            )));
        }
        if self.max_members == 0 {
            return Err(GroupError::Validation("max_members must be at least 1".into()));
        }
        Ok(())
    }
}

/// Role of a user inside one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
}

/// A (group, user) pair. Unique per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub group: GroupId,
    pub user: UserId,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(group: GroupId, user: UserId, role: Role) -> Self {
        Self {
            group,
            user,
            role,
            joined_at: Utc::now(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Lifecycle of a join request. `Approved` and `Denied` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

/// A request to join a private group. Rows are kept after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: RequestId,
    pub group: GroupId,
    pub user: UserId,
    pub status: RequestStatus,
    pub approver: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl JoinRequest {
    pub fn pending(id: RequestId, group: GroupId, user: UserId) -> Self {
        Self {
            id,
            group,
            user,
            status: RequestStatus::Pending,
            approver: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Move out of `Pending`. Any other starting state is rejected.
    pub fn resolve(&mut self, status: RequestStatus, approver: UserId) -> Result<(), GroupError> {
        if !self.is_pending() || status == RequestStatus::Pending {
            return Err(GroupError::RequestNotPending);
        }
        self.status = status;
        self.approver = Some(approver);
        self.resolved_at = Some(Utc::now());
        Ok(())
    }
}

/// A chat message. Immutable apart from the soft-delete transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub id: MessageId,
    pub group: GroupId,
    pub sender: UserId,
    pub sender_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub reply_to: Option<MessageId>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl GroupMessage {
    /// Trim and check a body. Whitespace-only and oversized bodies fail.
    pub fn normalize_body(body: &str) -> Result<String, GroupError> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(GroupError::InvalidMessage("message body is empty".into()));
        }
        if trimmed.chars().count() > MAX_MESSAGE_CHARS {
            return Err(GroupError::InvalidMessage(format!(
                "message body exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }
        Ok(trimmed.to_string())
    }

    /// Mark deleted. Returns `false` if it already was.
    pub fn soft_delete(&mut self, by: UserId) -> bool {
        if self.deleted {
            return false;
        }
        self.deleted = true;
        self.deleted_at = Some(Utc::now());
        self.deleted_by = Some(by);
        true
    }

    /// Reference used by replies; the body is withheld once deleted.
    pub fn as_reply_ref(&self) -> ReplyRef {
        ReplyRef {
            id: self.id,
            sender: self.sender,
            body: (!self.deleted).then(|| self.body.clone()),
            deleted: self.deleted,
        }
    }
}

/// What a reply shows of its parent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub id: MessageId,
    pub sender: UserId,
    pub body: Option<String>,
    pub deleted: bool,
}

/// A message as delivered to clients, both live and in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: UserId,
    pub sender_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub reply_to: Option<ReplyRef>,
}

impl ChatMessage {
    pub fn from_message(message: &GroupMessage, reply_to: Option<ReplyRef>) -> Self {
        Self {
            id: message.id,
            sender: message.sender,
            sender_name: message.sender_name.clone(),
            body: message.body.clone(),
            created_at: message.created_at,
            reply_to,
        }
    }
}

/// Presence identity of a connected user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    pub name: String,
}

impl Member {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Result of a join attempt that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// The user was already a member; nothing changed.
    AlreadyMember(Membership),
    /// A membership was created.
    Joined(Membership),
    /// The group is private; this pending request now stands (new or existing).
    Requested(JoinRequest),
}
