//! Error taxonomy for membership, join-request and message operations.
//!
//! Every mutation returns one specific variant so clients can render the
//! exact reason. "Already a member" is not here: it is a successful
//! [`JoinOutcome`](crate::model::JoinOutcome).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    /// Group, request, message, membership or user absent.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Caller lacks the membership or role required.
    #[error("not allowed")]
    Forbidden,

    /// No identity could be resolved for the caller.
    #[error("authentication required")]
    Unauthorized,

    /// User already belongs to a group linked to the same course.
    #[error("already in a study group for this course")]
    CourseConflict,

    #[error("this group is full")]
    GroupFull,

    #[error("join request is no longer pending")]
    RequestNotPending,

    #[error("the last admin cannot leave the group")]
    LastAdminCannotLeave,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl GroupError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GroupError::NotFound(_) => "not_found",
            GroupError::Forbidden => "forbidden",
            GroupError::Unauthorized => "unauthorized",
            GroupError::CourseConflict => "course_conflict",
            GroupError::GroupFull => "group_full",
            GroupError::RequestNotPending => "request_not_pending",
            GroupError::LastAdminCannotLeave => "last_admin_cannot_leave",
            GroupError::InvalidMessage(_) => "invalid_message",
            GroupError::Validation(_) => "validation",
            GroupError::Storage(_) => "storage",
        }
    }

    /// Failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, GroupError::Storage(_))
    }
}

pub type GroupResult<T> = Result<T, GroupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_and_course_codes_differ() {
        assert_ne!(GroupError::GroupFull.code(), GroupError::CourseConflict.code());
        assert_ne!(
            GroupError::GroupFull.to_string(),
            GroupError::CourseConflict.to_string()
        );
    }

    #[test]
    fn test_only_storage_is_transient() {
        assert!(GroupError::Storage("io".into()).is_transient());
        assert!(!GroupError::GroupFull.is_transient());
        assert!(!GroupError::NotFound("group").is_transient());
    }

    #[test]
    fn test_not_found_display() {
        assert_eq!(GroupError::NotFound("message").to_string(), "message not found");
    }
}
