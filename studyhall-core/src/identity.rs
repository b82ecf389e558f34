//! Identity directory: the boundary to the external user system.
//!
//! The collaboration core never stores users. It resolves a bearer token
//! to a [`Viewer`] and looks up display names through [`Directory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::ids::{CohortId, UserId};
use crate::model::Member;
use crate::permissions::{Permission, RoleGrant};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub cohorts: Vec<CohortId>,
    #[serde(default)]
    pub grants: Vec<RoleGrant>,
}

impl Viewer {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            cohorts: Vec::new(),
            grants: Vec::new(),
        }
    }

    pub fn in_cohort(mut self, cohort: CohortId) -> Self {
        self.cohorts.push(cohort);
        self
    }

    pub fn with_grant(mut self, grant: RoleGrant) -> Self {
        self.grants.push(grant);
        self
    }

    pub fn belongs_to(&self, cohort: CohortId) -> bool {
        self.cohorts.contains(&cohort)
    }

    pub fn is_administrator(&self) -> bool {
        self.grants
            .iter()
            .any(|g| matches!(g, RoleGrant::Administrator { .. }))
    }

    /// Whether a staff grant covers `permission` for groups owned by `cohort`.
    pub fn has_staff_permission(&self, cohort: CohortId, permission: Permission) -> bool {
        self.grants.iter().any(|g| g.covers(cohort, permission))
    }

    pub fn as_member(&self) -> Member {
        Member::new(self.id, self.name.clone())
    }
}

/// Lookup service for callers and users.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve a bearer token. `None` for unknown tokens.
    async fn authenticate(&self, token: &str) -> Option<Viewer>;

    /// Display identity for a user id.
    async fn profile(&self, user: UserId) -> Option<Member>;
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to read directory file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse directory file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct DirectoryFile {
    users: Vec<DirectoryEntry>,
}

#[derive(Deserialize)]
struct DirectoryEntry {
    token: String,
    #[serde(flatten)]
    viewer: Viewer,
}

/// In-memory directory keyed by token.
///
/// File format:
/// ```json
/// {"users": [{"token": "t-ada", "id": 1, "name": "Ada", "cohorts": [10],
///             "grants": [{"role": "administrator", "permissions": ["add_members"]}]}]}
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    by_token: HashMap<String, Viewer>,
    by_id: HashMap<UserId, Member>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: impl Into<String>, viewer: Viewer) -> Self {
        self.insert(token, viewer);
        self
    }

    pub fn insert(&mut self, token: impl Into<String>, viewer: Viewer) {
        self.by_id.insert(viewer.id, viewer.as_member());
        self.by_token.insert(token.into(), viewer);
    }

    pub fn from_json(json: &str) -> Result<Self, DirectoryError> {
        let file: DirectoryFile = serde_json::from_str(json)?;
        let mut directory = Self::new();
        for entry in file.users {
            directory.insert(entry.token, entry.viewer);
        }
        Ok(directory)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let directory = Self::from_json(&json)?;
        log::info!(
            "Loaded {} directory users from {}",
            directory.len(),
            path.as_ref().display()
        );
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn authenticate(&self, token: &str) -> Option<Viewer> {
        self.by_token.get(token).cloned()
    }

    async fn profile(&self, user: UserId) -> Option<Member> {
        self.by_id.get(&user).cloned()
    }
}
