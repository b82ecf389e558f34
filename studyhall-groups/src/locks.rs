//! Unit-of-work locks for membership mutations.
//!
//! Every join, approval, add, remove, leave and role change runs while
//! holding the lock for its [`LockScope`]. A group linked to a course is
//! locked at course scope, so the capacity check of the group and the
//! course-uniqueness check across sibling groups are read and written
//! under one lock. Groups without a course lock only themselves.
//!
//! Scopes are independent: a busy group never stalls an unrelated one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use studyhall_core::{CourseId, Group, GroupId};

/// What a unit of work serializes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    Course(CourseId),
    Group(GroupId),
}

impl LockScope {
    pub fn of(group: &Group) -> Self {
        match group.course {
            Some(course) => LockScope::Course(course),
            None => LockScope::Group(group.id),
        }
    }
}

/// Lazily populated table of per-scope async mutexes.
#[derive(Default)]
pub struct LockTable {
    scopes: Mutex<HashMap<LockScope, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `scope`. Released when the guard drops.
    pub async fn acquire(&self, scope: LockScope) -> OwnedMutexGuard<()> {
        let lock = {
            let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
            // Entries only the table references are idle.
            scopes.retain(|_, lock| Arc::strong_count(lock) > 1);
            scopes
                .entry(scope)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of scopes currently tracked.
    pub fn len(&self) -> usize {
        self.scopes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
