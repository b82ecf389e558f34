//! Join-request state machine for private groups.
//!
//! ```text
//!            approve (re-validated)
//!   pending ───────────────────────▶ approved
//!      │
//!      └──────── deny ─────────────▶ denied
//! ```
//!
//! Resolved rows are kept. A user whose request was resolved may file a
//! new one; while one is pending, asking again returns it.

use studyhall_core::{
    GroupError, GroupId, GroupResult, JoinOutcome, JoinRequest, Membership, Permission,
    RequestId, RequestStatus, Role, Viewer,
};
use studyhall_store::StoreBatch;

use crate::locks::LockScope;
use crate::service::GroupService;

/// A request that was approved together with the membership it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Approval {
    pub request: JoinRequest,
    pub membership: Membership,
}

impl GroupService {
    /// Join a public group directly, or file a request for a private one.
    pub async fn request_join(&self, group_id: GroupId, viewer: &Viewer) -> GroupResult<JoinOutcome> {
        let group = self.get_group(group_id)?;
        let _guard = self.locks.acquire(LockScope::of(&group)).await;

        if !group.is_private {
            return self.join_locked(&group, viewer.id, Role::Member);
        }

        if let Some(existing) = self.store.get_membership(group.id, viewer.id)? {
            return Ok(JoinOutcome::AlreadyMember(existing));
        }
        // A request that could never be approved is refused up front.
        self.check_admission(&group, viewer.id)?;

        if let Some(pending) = self.store.pending_request(group.id, viewer.id)? {
            return Ok(JoinOutcome::Requested(pending));
        }

        let request = JoinRequest::pending(self.store.next_request_id(), group.id, viewer.id);
        let mut batch = StoreBatch::new();
        batch.put_join_request(request.clone());
        self.store.write(batch)?;
        log::info!(
            "Join request {} filed by user {} for group {}",
            request.id,
            viewer.id,
            group.id
        );
        Ok(JoinOutcome::Requested(request))
    }

    /// Requests against a group, optionally filtered by status.
    pub fn join_requests(
        &self,
        group_id: GroupId,
        viewer: &Viewer,
        status: Option<RequestStatus>,
    ) -> GroupResult<Vec<JoinRequest>> {
        let group = self.get_group(group_id)?;
        if !self.can_manage(&group, viewer, Permission::ApproveRequests)?
            && !self.can_manage(&group, viewer, Permission::DenyRequests)?
        {
            return Err(GroupError::Forbidden);
        }
        Ok(self
            .store
            .join_requests(group.id)?
            .into_iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .collect())
    }

    /// Approve a pending request.
    ///
    /// Course uniqueness and capacity are checked again under the scope
    /// lock; on failure the request stays pending. The membership and the
    /// request transition are written in one batch.
    pub async fn approve(
        &self,
        group_id: GroupId,
        request_id: RequestId,
        viewer: &Viewer,
    ) -> GroupResult<Approval> {
        let group = self.get_group(group_id)?;
        self.require_manage(&group, viewer, Permission::ApproveRequests)?;

        let _guard = self.locks.acquire(LockScope::of(&group)).await;
        let mut request = self.load_request(group.id, request_id)?;
        if !request.is_pending() {
            return Err(GroupError::RequestNotPending);
        }

        let mut batch = StoreBatch::new();
        let membership = match self.store.get_membership(group.id, request.user)? {
            Some(existing) => existing,
            None => {
                self.check_admission(&group, request.user)?;
                let membership = Membership::new(group.id, request.user, Role::Member);
                batch.put_membership(membership.clone());
                membership
            }
        };
        request.resolve(RequestStatus::Approved, viewer.id)?;
        batch.put_join_request(request.clone());
        self.store.write(batch)?;

        log::info!(
            "Join request {} approved by {}; user {} joined group {}",
            request.id,
            viewer.id,
            request.user,
            group.id
        );
        Ok(Approval { request, membership })
    }

    /// Deny a pending request. Nothing else changes.
    pub async fn deny(
        &self,
        group_id: GroupId,
        request_id: RequestId,
        viewer: &Viewer,
    ) -> GroupResult<JoinRequest> {
        let group = self.get_group(group_id)?;
        self.require_manage(&group, viewer, Permission::DenyRequests)?;

        let _guard = self.locks.acquire(LockScope::of(&group)).await;
        let mut request = self.load_request(group.id, request_id)?;
        request.resolve(RequestStatus::Denied, viewer.id)?;

        let mut batch = StoreBatch::new();
        batch.put_join_request(request.clone());
        self.store.write(batch)?;
        log::info!("Join request {} denied by {}", request.id, viewer.id);
        Ok(request)
    }

    fn load_request(&self, group: GroupId, id: RequestId) -> GroupResult<JoinRequest> {
        self.store
            .get_join_request(id)?
            .filter(|r| r.group == group)
            .ok_or(GroupError::NotFound("join request"))
    }
}
