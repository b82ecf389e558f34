//! Membership & capacity guard.
//!
//! Admission checks, in order:
//! 1. already a member → [`JoinOutcome::AlreadyMember`], not an error
//! 2. linked course → no membership in any group on that course
//! 3. member count strictly below `max_members`
//!
//! [`GroupService::join`] evaluates the checks and inserts the membership
//! under one scope lock so two concurrent joins cannot both pass the
//! capacity check.

use studyhall_core::{
    CourseId, Group, GroupError, GroupId, GroupResult, JoinOutcome, Membership, Permission, Role,
    UserId, Viewer,
};
use studyhall_store::StoreBatch;

use crate::locks::LockScope;
use crate::service::GroupService;

/// Result of a dry-run admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    AlreadyMember(Membership),
    Open,
}

impl GroupService {
    /// Whether `user` could join `group` right now. Writes nothing.
    pub fn can_join(&self, group_id: GroupId, user: UserId) -> GroupResult<Admission> {
        let group = self.get_group(group_id)?;
        if let Some(existing) = self.store.get_membership(group.id, user)? {
            return Ok(Admission::AlreadyMember(existing));
        }
        self.check_admission(&group, user)?;
        Ok(Admission::Open)
    }

    /// Admit `user` with `role`, atomically with the admission checks.
    pub async fn join(&self, group_id: GroupId, user: UserId, role: Role) -> GroupResult<JoinOutcome> {
        let group = self.get_group(group_id)?;
        let _guard = self.locks.acquire(LockScope::of(&group)).await;
        self.join_locked(&group, user, role)
    }

    /// Remove the caller's own membership.
    pub async fn leave(&self, group_id: GroupId, viewer: &Viewer) -> GroupResult<Membership> {
        let group = self.get_group(group_id)?;
        let _guard = self.locks.acquire(LockScope::of(&group)).await;
        let removed = self.remove_locked(&group, viewer.id)?;
        log::info!("User {} left group {}", viewer.id, group.id);
        Ok(removed)
    }

    /// Add someone else. Requires [`Permission::AddMembers`].
    pub async fn add_member(
        &self,
        group_id: GroupId,
        target: UserId,
        viewer: &Viewer,
    ) -> GroupResult<JoinOutcome> {
        let group = self.get_group(group_id)?;
        self.require_manage(&group, viewer, Permission::AddMembers)?;
        if self.directory.profile(target).await.is_none() {
            return Err(GroupError::NotFound("user"));
        }

        let _guard = self.locks.acquire(LockScope::of(&group)).await;
        let outcome = self.join_locked(&group, target, Role::Member)?;
        if matches!(outcome, JoinOutcome::Joined(_)) {
            log::info!("User {target} added to group {} by {}", group.id, viewer.id);
        }
        Ok(outcome)
    }

    /// Remove someone else. Requires [`Permission::RemoveMembers`].
    pub async fn remove_member(
        &self,
        group_id: GroupId,
        target: UserId,
        viewer: &Viewer,
    ) -> GroupResult<Membership> {
        let group = self.get_group(group_id)?;
        self.require_manage(&group, viewer, Permission::RemoveMembers)?;

        let _guard = self.locks.acquire(LockScope::of(&group)).await;
        let removed = self.remove_locked(&group, target)?;
        log::info!("User {target} removed from group {} by {}", group.id, viewer.id);
        Ok(removed)
    }

    /// Promote or demote a member. Requires [`Permission::AddMembers`].
    pub async fn set_role(
        &self,
        group_id: GroupId,
        target: UserId,
        role: Role,
        viewer: &Viewer,
    ) -> GroupResult<Membership> {
        let group = self.get_group(group_id)?;
        self.require_manage(&group, viewer, Permission::AddMembers)?;

        let _guard = self.locks.acquire(LockScope::of(&group)).await;
        let mut membership = self
            .store
            .get_membership(group.id, target)?
            .ok_or(GroupError::NotFound("membership"))?;
        if membership.role == role {
            return Ok(membership);
        }
        if membership.is_admin() && self.admin_count(group.id)? <= 1 {
            return Err(GroupError::LastAdminCannotLeave);
        }

        membership.role = role;
        let mut batch = StoreBatch::new();
        batch.put_membership(membership.clone());
        self.store.write(batch)?;
        log::info!(
            "User {target} is now {role:?} in group {} (by {})",
            group.id,
            viewer.id
        );
        Ok(membership)
    }

    // ─── Locked helpers: caller holds the scope lock ──────────────────

    pub(crate) fn join_locked(
        &self,
        group: &Group,
        user: UserId,
        role: Role,
    ) -> GroupResult<JoinOutcome> {
        if let Some(existing) = self.store.get_membership(group.id, user)? {
            return Ok(JoinOutcome::AlreadyMember(existing));
        }
        self.check_admission(group, user)?;

        let membership = Membership::new(group.id, user, role);
        let mut batch = StoreBatch::new();
        batch.put_membership(membership.clone());
        self.store.write(batch)?;
        log::info!("User {user} joined group {} as {role:?}", group.id);
        Ok(JoinOutcome::Joined(membership))
    }

    /// Course uniqueness, then capacity. Assumes `user` is not a member.
    pub(crate) fn check_admission(&self, group: &Group, user: UserId) -> GroupResult<()> {
        if let Some(course) = group.course {
            self.ensure_no_course_membership(course, user)?;
        }
        let count = self.store.count_memberships(group.id)?;
        if count >= group.max_members as usize {
            return Err(GroupError::GroupFull);
        }
        Ok(())
    }

    pub(crate) fn ensure_no_course_membership(
        &self,
        course: CourseId,
        user: UserId,
    ) -> GroupResult<()> {
        for sibling in self.store.groups_for_course(course)? {
            if self.store.get_membership(sibling.id, user)?.is_some() {
                return Err(GroupError::CourseConflict);
            }
        }
        Ok(())
    }

    fn remove_locked(&self, group: &Group, user: UserId) -> GroupResult<Membership> {
        let membership = self
            .store
            .get_membership(group.id, user)?
            .ok_or(GroupError::NotFound("membership"))?;
        if membership.is_admin() && self.admin_count(group.id)? <= 1 {
            return Err(GroupError::LastAdminCannotLeave);
        }
        let mut batch = StoreBatch::new();
        batch.delete_membership(group.id, user);
        self.store.write(batch)?;
        Ok(membership)
    }
}
