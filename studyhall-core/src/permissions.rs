//! Staff role grants and the enumerated permission set they carry.
//!
//! Permissions are a closed set: an unknown name in a directory file
//! fails to deserialize instead of silently granting nothing.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::CohortId;

/// A single management capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    AddMembers,
    RemoveMembers,
    ApproveRequests,
    DenyRequests,
    DeleteMessages,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Permission::AddMembers,
        Permission::RemoveMembers,
        Permission::ApproveRequests,
        Permission::DenyRequests,
        Permission::DeleteMessages,
    ];

    pub fn flag(self) -> PermissionSet {
        match self {
            Permission::AddMembers => PermissionSet::ADD_MEMBERS,
            Permission::RemoveMembers => PermissionSet::REMOVE_MEMBERS,
            Permission::ApproveRequests => PermissionSet::APPROVE_REQUESTS,
            Permission::DenyRequests => PermissionSet::DENY_REQUESTS,
            Permission::DeleteMessages => PermissionSet::DELETE_MESSAGES,
        }
    }
}

bitflags! {
    /// Set of [`Permission`]s held by a role grant.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PermissionSet: u8 {
        const ADD_MEMBERS = 1 << 0;
        const REMOVE_MEMBERS = 1 << 1;
        const APPROVE_REQUESTS = 1 << 2;
        const DENY_REQUESTS = 1 << 3;
        const DELETE_MESSAGES = 1 << 4;
    }
}

impl PermissionSet {
    pub fn allows(&self, permission: Permission) -> bool {
        self.contains(permission.flag())
    }

    pub fn permissions(&self) -> Vec<Permission> {
        Permission::ALL
            .into_iter()
            .filter(|p| self.allows(*p))
            .collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        iter.into_iter()
            .fold(PermissionSet::empty(), |set, p| set | p.flag())
    }
}

// Serialized as a list of permission names: ["add_members", "deny_requests"].
impl Serialize for PermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.permissions().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let list = Vec::<Permission>::deserialize(deserializer)?;
        Ok(list.into_iter().collect())
    }
}

/// A staff role held outside of any single group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleGrant {
    /// Representative of one class / cohort.
    ClassRepresentative {
        cohort: CohortId,
        permissions: PermissionSet,
    },
    /// Global administrator.
    Administrator { permissions: PermissionSet },
}

impl RoleGrant {
    /// Whether this grant covers `permission` on a group owned by `cohort`.
    pub fn covers(&self, cohort: CohortId, permission: Permission) -> bool {
        match self {
            RoleGrant::ClassRepresentative {
                cohort: rep_cohort,
                permissions,
            } => *rep_cohort == cohort && permissions.allows(permission),
            RoleGrant::Administrator { permissions } => permissions.allows(permission),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_from_permissions() {
        let set: PermissionSet = [Permission::AddMembers, Permission::DenyRequests]
            .into_iter()
            .collect();
        assert!(set.allows(Permission::AddMembers));
        assert!(set.allows(Permission::DenyRequests));
        assert!(!set.allows(Permission::RemoveMembers));
        assert_eq!(set.permissions().len(), 2);
    }

    #[test]
    fn test_grant_json_roundtrip_and_unknown_permission() {
        let json = r#"{"role":"class_representative","cohort":3,"permissions":["approve_requests"]}"#;
        let grant: RoleGrant = serde_json::from_str(json).unwrap();
        assert!(grant.covers(CohortId(3), Permission::ApproveRequests));
        assert!(!grant.covers(CohortId(4), Permission::ApproveRequests));
        assert!(!grant.covers(CohortId(3), Permission::AddMembers));

        let bad = r#"{"role":"administrator","permissions":["launch_rockets"]}"#;
        assert!(serde_json::from_str::<RoleGrant>(bad).is_err());
    }

    #[test]
    fn test_administrator_ignores_cohort() {
        let grant = RoleGrant::Administrator {
            permissions: Permission::ALL.into_iter().collect(),
        };
        assert!(grant.covers(CohortId(1), Permission::RemoveMembers));
        assert!(grant.covers(CohortId(99), Permission::DeleteMessages));
    }

    #[test]
    fn test_empty_set_serializes_as_empty_list() {
        let json = serde_json::to_string(&PermissionSet::empty()).unwrap();
        assert_eq!(json, "[]");
    }
}
