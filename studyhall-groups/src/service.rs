//! Group lifecycle, membership queries and the shared management check.

use chrono::Utc;
use std::sync::Arc;

use studyhall_core::{
    Directory, Group, GroupError, GroupId, GroupResult, Membership, NewGroup, Permission, Role,
    UserId, Viewer,
};
use studyhall_store::{GroupStore, StoreBatch};

use crate::locks::{LockScope, LockTable};

/// Entry point for every durable group operation.
///
/// Methods that mutate memberships or join requests take the unit-of-work
/// lock for the group's [`LockScope`] and re-read all state they check
/// while holding it.
pub struct GroupService {
    pub(crate) store: Arc<GroupStore>,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) locks: LockTable,
}

impl GroupService {
    pub fn new(store: Arc<GroupStore>, directory: Arc<dyn Directory>) -> Self {
        Self {
            store,
            directory,
            locks: LockTable::new(),
        }
    }

    pub fn store(&self) -> &Arc<GroupStore> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    // ─── Groups ───────────────────────────────────────────────────────

    pub fn get_group(&self, id: GroupId) -> GroupResult<Group> {
        self.store.get_group(id)?.ok_or(GroupError::NotFound("group"))
    }

    /// A group as `viewer` may see it: administrators see every group,
    /// everyone else only their cohorts' groups and groups they belong to.
    /// Hidden groups read as absent.
    pub fn view_group(&self, id: GroupId, viewer: &Viewer) -> GroupResult<Group> {
        let group = self.get_group(id)?;
        if viewer.is_administrator()
            || viewer.belongs_to(group.cohort)
            || self.is_member(group.id, viewer.id)?
        {
            Ok(group)
        } else {
            Err(GroupError::NotFound("group"))
        }
    }

    /// Create a group with the caller as its first admin.
    ///
    /// The creator's membership counts against course uniqueness like any
    /// other join.
    pub async fn create_group(&self, viewer: &Viewer, new: NewGroup) -> GroupResult<Group> {
        new.validate()?;
        if !viewer.belongs_to(new.cohort) {
            return Err(GroupError::Forbidden);
        }

        let now = Utc::now();
        let group = Group {
            id: self.store.next_group_id(),
            name: new.name.trim().to_string(),
            description: new.description.trim().to_string(),
            cohort: new.cohort,
            course: new.course,
            created_by: viewer.id,
            is_private: new.is_private,
            max_members: new.max_members,
            created_at: now,
            updated_at: now,
        };

        let _guard = self.locks.acquire(LockScope::of(&group)).await;
        if let Some(course) = group.course {
            self.ensure_no_course_membership(course, viewer.id)?;
        }

        let mut batch = StoreBatch::new();
        batch
            .put_group(group.clone())
            .put_membership(Membership::new(group.id, viewer.id, Role::Admin));
        self.store.write(batch)?;

        log::info!(
            "Group {} '{}' created by user {}",
            group.id,
            group.name,
            viewer.id
        );
        Ok(group)
    }

    /// Groups owned by any of the viewer's cohorts. Administrators see all.
    pub fn list_groups(&self, viewer: &Viewer) -> GroupResult<Vec<Group>> {
        let groups = self.store.list_groups()?;
        if viewer.is_administrator() {
            return Ok(groups);
        }
        Ok(groups
            .into_iter()
            .filter(|g| viewer.belongs_to(g.cohort))
            .collect())
    }

    /// Groups the viewer is a member of.
    pub fn my_groups(&self, viewer: &Viewer) -> GroupResult<Vec<Group>> {
        let mut groups = Vec::new();
        for membership in self.store.memberships_of_user(viewer.id)? {
            if let Some(group) = self.store.get_group(membership.group)? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    // ─── Membership queries ───────────────────────────────────────────

    pub fn membership(&self, group: GroupId, user: UserId) -> GroupResult<Option<Membership>> {
        Ok(self.store.get_membership(group, user)?)
    }

    pub fn is_member(&self, group: GroupId, user: UserId) -> GroupResult<bool> {
        Ok(self.membership(group, user)?.is_some())
    }

    /// The caller's membership, or `Forbidden`.
    pub fn require_member(&self, group: GroupId, user: UserId) -> GroupResult<Membership> {
        self.membership(group, user)?.ok_or(GroupError::Forbidden)
    }

    /// Member list, visible to members and to anyone who may manage the group.
    pub fn members(&self, group_id: GroupId, viewer: &Viewer) -> GroupResult<Vec<Membership>> {
        let group = self.get_group(group_id)?;
        let visible = self.is_member(group.id, viewer.id)?
            || Permission::ALL
                .into_iter()
                .any(|p| viewer.has_staff_permission(group.cohort, p));
        if !visible {
            return Err(GroupError::Forbidden);
        }
        Ok(self.store.memberships(group.id)?)
    }

    /// Whether `viewer` may perform `permission` on `group`.
    ///
    /// Group admins may do everything. Class representatives of the owning
    /// cohort and administrators may do what their grant lists.
    pub fn can_manage(
        &self,
        group: &Group,
        viewer: &Viewer,
        permission: Permission,
    ) -> GroupResult<bool> {
        if viewer.has_staff_permission(group.cohort, permission) {
            return Ok(true);
        }
        Ok(self
            .store
            .get_membership(group.id, viewer.id)?
            .is_some_and(|m| m.is_admin()))
    }

    pub(crate) fn require_manage(
        &self,
        group: &Group,
        viewer: &Viewer,
        permission: Permission,
    ) -> GroupResult<()> {
        if self.can_manage(group, viewer, permission)? {
            Ok(())
        } else {
            log::debug!(
                "User {} denied {permission:?} on group {}",
                viewer.id,
                group.id
            );
            Err(GroupError::Forbidden)
        }
    }

    pub(crate) fn admin_count(&self, group: GroupId) -> GroupResult<usize> {
        Ok(self
            .store
            .memberships(group)?
            .iter()
            .filter(|m| m.is_admin())
            .count())
    }
}
