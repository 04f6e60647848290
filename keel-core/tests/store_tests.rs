//! Project store behaviour: uniqueness, visibility of staged rows, lifecycle
//! transitions, owner filtering, and on-disk persistence.

use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};
use keel_core::{
    IdentityDirectory, ProjectName, ProjectState, ProjectStore, StoreError, User, UserId,
};

fn store() -> ProjectStore {
    let store = ProjectStore::open_in_memory().expect("open store");
    store.upsert_user(&User::new("u1", false)).expect("u1");
    store.upsert_user(&User::new("u2", false)).expect("u2");
    store.upsert_user(&User::new("root", true)).expect("root");
    store
}

fn u1() -> UserId {
    UserId::from("u1")
}

fn alpha() -> ProjectName {
    ProjectName::from("alpha")
}

// ---------------------------------------------------------------------------
// 1. Create / find
// ---------------------------------------------------------------------------

#[test]
fn create_then_find_by_id_and_name() {
    let store = store();
    let created = store.create(&alpha(), &u1()).expect("create");
    assert_eq!(created.state, ProjectState::Active);

    assert_eq!(store.find_by_id(&created.id).expect("by id"), created);
    assert_eq!(store.find_by_name(&alpha()).expect("by name"), created);
}

#[test]
fn duplicate_name_is_conflict() {
    let store = store();
    store.create(&alpha(), &u1()).expect("first");
    let err = store
        .create(&alpha(), &UserId::from("u2"))
        .expect_err("duplicate must fail");
    assert!(matches!(err, StoreError::Conflict { .. }), "got: {err}");
    assert!(err.to_string().contains("alpha"));
    assert_eq!(store.list_all().expect("list").len(), 1);
}

#[test]
fn unknown_owner_is_rejected() {
    let store = store();
    let err = store
        .create(&alpha(), &UserId::from("ghost"))
        .expect_err("ghost owner");
    assert!(
        matches!(err, StoreError::NotFound { entity: "user", .. }),
        "got: {err}"
    );
}

#[test]
fn missing_rows_are_not_found() {
    let store = store();
    let err = store
        .find_by_name(&ProjectName::from("nope"))
        .expect_err("missing");
    assert!(err.is_not_found());
    assert!(err.to_string().contains("project 'nope' not found"));

    let err = store
        .delete(&keel_core::ProjectId::from("01NOPE"))
        .expect_err("missing");
    assert!(err.is_not_found());
}

// ---------------------------------------------------------------------------
// 2. Staged rows
// ---------------------------------------------------------------------------

#[test]
fn staged_row_is_invisible_but_reserves_the_name() {
    let store = store();
    let staged = store.stage(&alpha(), &u1()).expect("stage");
    assert_eq!(staged.state, ProjectState::Provisioning);

    assert!(store.find_by_id(&staged.id).expect_err("hidden").is_not_found());
    assert!(store.find_by_name(&alpha()).expect_err("hidden").is_not_found());
    assert!(store.list_all().expect("list").is_empty());

    let err = store
        .create(&alpha(), &UserId::from("u2"))
        .expect_err("name is reserved");
    assert!(matches!(err, StoreError::Conflict { .. }));
}

#[test]
fn activate_makes_a_staged_row_visible() {
    let store = store();
    let staged = store.stage(&alpha(), &u1()).expect("stage");
    store.activate(&staged.id).expect("activate");

    let found = store.find_by_name(&alpha()).expect("visible");
    assert_eq!(found.state, ProjectState::Active);
    assert_eq!(found.id, staged.id);

    assert!(store.activate(&staged.id).expect_err("already active").is_not_found());
}

#[test]
fn discard_only_removes_staged_rows() {
    let store = store();
    let staged = store.stage(&alpha(), &u1()).expect("stage");
    store.discard(&staged.id).expect("discard");
    assert!(store.list_ids().expect("ids").is_empty());

    let active = store.create(&alpha(), &u1()).expect("create after discard");
    assert!(store.discard(&active.id).expect_err("active row").is_not_found());
    assert!(store.find_by_id(&active.id).is_ok());
}

// ---------------------------------------------------------------------------
// 3. Delete lifecycle
// ---------------------------------------------------------------------------

#[test]
fn begin_delete_hides_the_row_and_can_be_restored() {
    let store = store();
    let project = store.create(&alpha(), &u1()).expect("create");

    let claimed = store.begin_delete(&project.id).expect("claim");
    assert_eq!(claimed.state, ProjectState::Deleting);
    assert!(store.find_by_id(&project.id).expect_err("hidden").is_not_found());

    store.restore(&project.id).expect("restore");
    assert_eq!(store.find_by_id(&project.id).expect("back"), project);
}

#[test]
fn second_begin_delete_loses_with_not_found() {
    let store = store();
    let project = store.create(&alpha(), &u1()).expect("create");
    store.begin_delete(&project.id).expect("winner");
    let err = store.begin_delete(&project.id).expect_err("loser");
    assert!(err.is_not_found(), "got: {err}");
}

#[test]
fn delete_removes_row_in_any_state() {
    let store = store();
    let project = store.create(&alpha(), &u1()).expect("create");
    store.begin_delete(&project.id).expect("claim");
    store.delete(&project.id).expect("delete");
    assert!(store.list_ids().expect("ids").is_empty());
    assert!(store.delete(&project.id).expect_err("gone").is_not_found());
}

#[test]
fn finish_delete_only_removes_deleting_rows() {
    let store = store();
    let project = store.create(&alpha(), &u1()).expect("create");
    assert!(store
        .finish_delete(&project.id)
        .expect_err("active row is not claimable")
        .is_not_found());

    store.begin_delete(&project.id).expect("claim");
    store.finish_delete(&project.id).expect("finish");
    assert!(store.list_ids().expect("ids").is_empty());
}

#[tokio::test]
async fn blocking_runs_store_calls_off_the_runtime() {
    let store = store();
    let created = store
        .blocking(|store| store.create(&alpha(), &u1()))
        .await
        .expect("create");
    let id = created.id.clone();
    let found = store
        .blocking(move |store| store.find_by_id(&id))
        .await
        .expect("find");
    assert_eq!(found, created);
}

// ---------------------------------------------------------------------------
// 4. Listing
// ---------------------------------------------------------------------------

#[test]
fn list_by_owner_filters_and_list_all_does_not() {
    let store = store();
    store.create(&alpha(), &u1()).expect("alpha");
    store
        .create(&ProjectName::from("beta"), &UserId::from("u2"))
        .expect("beta");
    store
        .create(&ProjectName::from("gamma"), &u1())
        .expect("gamma");

    let mine: Vec<_> = store
        .list_by_owner(&u1())
        .expect("mine")
        .into_iter()
        .map(|p| p.name.0)
        .collect();
    assert_eq!(mine, vec!["alpha", "gamma"]);
    assert_eq!(store.list_all().expect("all").len(), 3);
}

#[test]
fn list_stale_respects_state_and_cutoff() {
    let store = store();
    let staged = store.stage(&alpha(), &u1()).expect("stage");
    store
        .create(&ProjectName::from("beta"), &u1())
        .expect("active");

    let future = Utc::now() + Duration::seconds(60);
    let stale = store
        .list_stale(ProjectState::Provisioning, future)
        .expect("stale");
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, staged.id);

    let past = Utc::now() - Duration::seconds(60);
    assert!(store
        .list_stale(ProjectState::Provisioning, past)
        .expect("fresh")
        .is_empty());
}

// ---------------------------------------------------------------------------
// 5. Concurrency and persistence
// ---------------------------------------------------------------------------

#[test]
fn concurrent_creates_of_one_name_yield_one_row() {
    let store = Arc::new(store());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let owner = if i % 2 == 0 { "u1" } else { "u2" };
            thread::spawn(move || store.create(&ProjectName::from("alpha"), &UserId::from(owner)))
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::Conflict { .. })))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(store.list_all().expect("list").len(), 1);
}

#[test]
fn rows_persist_across_reopen() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let path = dir.path().join("nested").join("keel.db");

    let id = {
        let store = ProjectStore::open(&path).expect("open");
        store.upsert_user(&User::new("u1", false)).expect("user");
        store.create(&alpha(), &u1()).expect("create").id
    };

    let reopened = ProjectStore::open(&path).expect("reopen");
    assert_eq!(reopened.find_by_name(&alpha()).expect("find").id, id);
}

// ---------------------------------------------------------------------------
// 6. Identity directory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identity_directory_reads_admin_flag_fresh() {
    let store = store();
    assert!(store.get_user(&UserId::from("root")).await.expect("root").is_admin);

    store
        .upsert_user(&User::new("root", false))
        .expect("revoke admin");
    assert!(!store.get_user(&UserId::from("root")).await.expect("root").is_admin);

    let err = store
        .get_user(&UserId::from("ghost"))
        .await
        .expect_err("unknown");
    assert!(matches!(err, StoreError::NotFound { entity: "user", .. }));
}
