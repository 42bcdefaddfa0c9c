use chrono::Utc;
use roster_sync::lock::{InstanceLock, PgInstanceLock};
use roster_sync::membership::{Activation, MembershipStore, PgMembershipStore};
use roster_sync::resolver::{IdentityResolver, PgIdentityResolver};
use roster_sync::schema::initialize_schema;
use roster_sync::state::{ErrorEntry, SyncState};
use roster_sync::store::{InstanceStore, PgInstanceStore, PgSyncStateStore, SyncStateStore};
use roster_sync::types::{ExternalCourseMapping, MembershipStatus, NewInstance};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use testing::{postgres_pool, unique_identifier};
use tokio::sync::OnceCell;

static SCHEMA: OnceCell<()> = OnceCell::const_new();

async fn setup() -> Option<PgPool> {
    let Some(pool) = postgres_pool().await else {
        eprintln!("Skipping PostgreSQL test: Docker not available");
        return None;
    };
    SCHEMA
        .get_or_init(|| async { initialize_schema(&pool).await.unwrap() })
        .await;
    Some(pool)
}

async fn create_account(pool: &PgPool, username: &str) -> i64 {
    let (id,) = sqlx::query_as::<_, (i64,)>("INSERT INTO accounts (username) VALUES ($1) RETURNING id")
        .bind(username)
        .fetch_one(pool)
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn test_state_upsert_keeps_metadata() {
    let Some(pool) = setup().await else {
        return;
    };
    let instances = PgInstanceStore::new(pool.clone());
    let states = PgSyncStateStore::new(pool.clone());

    let instance = instances
        .insert(&NewInstance::for_course(3, "Roster"), None)
        .await
        .unwrap();
    let mapping = ExternalCourseMapping {
        term: "2026".to_string(),
        external_course_id: "CS101".to_string(),
        college_name: "Computer Science".to_string(),
        course_name: "Data Structures".to_string(),
        student_capacity: 60
    };

    let first = SyncState::new(instance.id, mapping.clone(), Utc::now());
    states.upsert(&first).await.unwrap();

    let mut next = SyncState::new(instance.id, ExternalCourseMapping::default(), Utc::now());
    next.success.insert("s1".to_string());
    next.errors
        .insert("s2".to_string(), ErrorEntry::exit("s2", 5));
    states.upsert(&next).await.unwrap();

    let stored = states.get(instance.id).await.unwrap().unwrap();
    assert_eq!(stored.mapping, mapping);
    assert_eq!(stored.success, next.success);
    assert_eq!(stored.errors, next.errors);
    assert_eq!(
        stored.created.timestamp_micros(),
        first.created.timestamp_micros()
    );

    assert!(instances.delete(instance.id).await.unwrap());
    assert!(states.get(instance.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_membership_lifecycle() {
    let Some(pool) = setup().await else {
        return;
    };
    let instances = PgInstanceStore::new(pool.clone());
    let memberships = PgMembershipStore::new(pool.clone());
    let resolver = PgIdentityResolver::new(pool.clone());

    let username = unique_identifier();
    let account_id = create_account(&pool, &username).await;
    assert_eq!(resolver.resolve(&username).await.unwrap(), Some(account_id));
    assert_eq!(resolver.resolve("nobody-here").await.unwrap(), None);

    let instance = instances
        .insert(&NewInstance::for_course(3, "Roster"), None)
        .await
        .unwrap();
    let window = instance.validity_window(Utc::now());

    assert_eq!(
        memberships.activate(&instance, account_id, 5, window).await.unwrap(),
        Activation::Created
    );
    assert_eq!(memberships.count_active(instance.id).await.unwrap(), 1);
    assert!(memberships.suspend(instance.id, account_id).await.unwrap());
    assert!(!memberships.suspend(instance.id, account_id).await.unwrap());

    let record = memberships
        .membership(instance.id, account_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, MembershipStatus::Suspended);

    assert_eq!(
        memberships.activate(&instance, account_id, 5, window).await.unwrap(),
        Activation::Reactivated
    );
    assert_eq!(memberships.count_active(instance.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_group_members_move_with_instance() {
    let Some(pool) = setup().await else {
        return;
    };
    let instances = PgInstanceStore::new(pool.clone());
    let memberships = PgMembershipStore::new(pool.clone());

    let account_id = create_account(&pool, &unique_identifier()).await;
    let instance = instances
        .insert(&NewInstance::for_course(3, "Roster"), None)
        .await
        .unwrap();

    let old_group = memberships.create_group(3, "Data Structures").await.unwrap();
    let new_group = memberships.create_group(3, "Data Structures B").await.unwrap();
    memberships
        .add_group_member(old_group, account_id, instance.id)
        .await
        .unwrap();
    assert!(memberships.is_group_member(old_group, account_id).await.unwrap());

    assert_eq!(
        memberships
            .move_group_members(instance.id, new_group)
            .await
            .unwrap(),
        1
    );
    assert!(!memberships.is_group_member(old_group, account_id).await.unwrap());
    assert!(memberships.is_group_member(new_group, account_id).await.unwrap());
}

#[tokio::test]
async fn test_advisory_run_lock_spans_services() {
    let Some(pool) = setup().await else {
        return;
    };
    // Two lock instances stand in for two processes sharing the database.
    let cli = PgInstanceLock::new(pool.clone());
    let scheduler = Arc::new(PgInstanceLock::new(pool.clone()));

    let held = cli.acquire(4242).await.unwrap();

    let other = tokio::time::timeout(Duration::from_secs(2), scheduler.acquire(4243))
        .await
        .unwrap()
        .unwrap();
    other.release().await;

    let waiter = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.acquire(4242).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());

    held.release().await;
    let next = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    next.release().await;
}
