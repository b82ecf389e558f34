//! Concurrency invariants over a real store.

use std::sync::Arc;

use studyhall_core::{
    CohortId, CourseId, GroupError, JoinOutcome, NewGroup, StaticDirectory, UserId, Viewer,
};
use studyhall_groups::GroupService;
use studyhall_store::{GroupStore, StoreConfig};

fn viewer(id: u64) -> Viewer {
    Viewer::new(UserId(id), format!("user{id}")).in_cohort(CohortId(1))
}

fn setup() -> (tempfile::TempDir, Arc<GroupService>) {
    let dir = tempfile::tempdir().unwrap();
    let store = GroupStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
    let service = GroupService::new(Arc::new(store), Arc::new(StaticDirectory::new()));
    (dir, Arc::new(service))
}

fn group_spec(name: &str, max_members: u32, course: Option<CourseId>) -> NewGroup {
    NewGroup {
        name: name.into(),
        description: "weekly sessions".into(),
        cohort: CohortId(1),
        course,
        is_private: false,
        max_members,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_never_exceed_capacity() {
    let (_dir, service) = setup();
    let owner = viewer(1);
    // Owner occupies one seat: 4 left for 10 contenders.
    let group = service
        .create_group(&owner, group_spec("Physics", 5, None))
        .await
        .unwrap();

    let group_id = group.id;
    let mut handles = Vec::new();
    for id in 100..110 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.request_join(group_id, &viewer(id)).await
        }));
    }
    let results = futures_util::future::join_all(handles).await;

    let mut joined = 0;
    let mut full = 0;
    for result in results {
        match result.unwrap() {
            Ok(JoinOutcome::Joined(_)) => joined += 1,
            Err(GroupError::GroupFull) => full += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(joined, 4);
    assert_eq!(full, 6);
    assert_eq!(service.store().count_memberships(group.id).unwrap(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn max_members_plus_five_exactly_five_succeed() {
    let (_dir, service) = setup();
    let owner = viewer(1);
    let group = service
        .create_group(&owner, group_spec("Chemistry", 6, None))
        .await
        .unwrap();

    let group_id = group.id;
    let handles: Vec<_> = (200..210)
        .map(|id| {
            let service = service.clone();
            tokio::spawn(async move { service.request_join(group_id, &viewer(id)).await })
        })
        .collect();

    let outcomes: Vec<_> = futures_util::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
    let full = outcomes
        .iter()
        .filter(|o| matches!(o, Err(GroupError::GroupFull)))
        .count();

    assert_eq!(succeeded, 5);
    assert_eq!(full, 5);
    assert_eq!(service.store().count_memberships(group.id).unwrap(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_on_sibling_course_groups() {
    let (_dir, service) = setup();
    let course = Some(CourseId(42));
    let a = service
        .create_group(&viewer(1), group_spec("A", 10, course))
        .await
        .unwrap();
    let b = service
        .create_group(&viewer(2), group_spec("B", 10, course))
        .await
        .unwrap();

    // The same user races into both groups of one course.
    let student = viewer(50);
    let (ra, rb) = tokio::join!(
        {
            let service = service.clone();
            let student = student.clone();
            async move { service.request_join(a.id, &student).await }
        },
        {
            let service = service.clone();
            let student = student.clone();
            async move { service.request_join(b.id, &student).await }
        }
    );

    let wins = [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(wins, 1);
    let loser = if ra.is_ok() { rb } else { ra };
    assert_eq!(loser, Err(GroupError::CourseConflict));
}

#[tokio::test]
async fn course_conflict_and_full_are_distinct() {
    let (_dir, service) = setup();
    let course = Some(CourseId(9));
    let a = service
        .create_group(&viewer(1), group_spec("A", 5, course))
        .await
        .unwrap();
    let b = service
        .create_group(&viewer(2), group_spec("B", 1, course))
        .await
        .unwrap();

    service.request_join(a.id, &viewer(3)).await.unwrap();
    let conflict = service.request_join(b.id, &viewer(3)).await.unwrap_err();
    assert_eq!(conflict, GroupError::CourseConflict);

    let full = service.request_join(b.id, &viewer(4)).await.unwrap_err();
    assert_eq!(full, GroupError::GroupFull);
    assert_ne!(conflict.code(), full.code());
}
