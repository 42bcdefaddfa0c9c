use roster_sync::config::{FetchFailurePolicy, HttpConfig, RosterSyncConfig, SourceConfig};
use roster_sync::memory::{
    InMemoryDirectory, InMemoryInstanceStore, InMemoryMembershipStore, InMemorySyncStateStore
};
use roster_sync::state::ErrorReason;
use roster_sync::store::{InstanceStore, SyncStateStore};
use roster_sync::sync::{RosterSyncService, SkipReason, SyncBackends, SyncOutcome};
use roster_sync::types::{ExternalCourseMapping, GroupTarget, MembershipStatus, NewInstance};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    server: MockServer,
    directory: Arc<InMemoryDirectory>,
    memberships: Arc<InMemoryMembershipStore>,
    states: Arc<InMemorySyncStateStore>,
    instances: Arc<InMemoryInstanceStore>,
    service: RosterSyncService
}

async fn harness(policy: FetchFailurePolicy) -> Harness {
    let server = MockServer::start().await;
    let mut config = RosterSyncConfig::default();
    config.source = SourceConfig {
        token_url: format!("{}/token", server.uri()),
        course_url: format!("{}/courses", server.uri()),
        members_url: format!("{}/members", server.uri()),
        client_id: "lms".to_string(),
        selector_id: "spring".to_string(),
        term: Some("2026".to_string())
    };
    config.http = HttpConfig {
        request_timeout_seconds: 5,
        max_retries: 0,
        retry_delay_ms: 10
    };
    config.sync.on_fetch_failure = policy;

    let directory = Arc::new(InMemoryDirectory::new());
    let memberships = Arc::new(InMemoryMembershipStore::new());
    let states = Arc::new(InMemorySyncStateStore::new());
    let instances = Arc::new(InMemoryInstanceStore::new());

    let tokens = roster_sync::token::create_token_client(config.source.clone(), &config.http).unwrap();
    let roster = roster_sync::client::create_roster_client(config.source.clone(), &config.http).unwrap();
    let service = RosterSyncService::new(
        config,
        tokens,
        roster,
        SyncBackends {
            resolver: directory.clone(),
            memberships: memberships.clone(),
            states: states.clone(),
            instances: instances.clone(),
            notifier: None
        }
    );

    Harness {
        server,
        directory,
        memberships,
        states,
        instances,
        service
    }
}

fn mapping() -> ExternalCourseMapping {
    ExternalCourseMapping {
        term: "2026".to_string(),
        external_course_id: "CS101".to_string(),
        college_name: "Computer Science".to_string(),
        course_name: "Data Structures".to_string(),
        student_capacity: 60
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": 1, "data": {"token": "tok"}}))
        )
        .mount(server)
        .await;
}

async fn mount_members(server: &MockServer, members: &[&str]) {
    server.reset().await;
    mount_token(server).await;
    Mock::given(method("POST"))
        .and(path("/members"))
        .and(body_string_contains("idnumber=CS101"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 1, "data": members})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_create_then_resync_with_departure() {
    let h = harness(FetchFailurePolicy::Reconcile).await;
    let s1 = h.directory.add_account("s1").await;
    let s2 = h.directory.add_account("s2").await;
    mount_members(&h.server, &["s1", "s2"]).await;

    let (instance, outcome) = h
        .service
        .create_instance(NewInstance::for_course(7, "Roster"), mapping())
        .await
        .unwrap();
    assert_eq!(outcome.report().unwrap().synced, 2);

    mount_members(&h.server, &["s1", "s3"]).await;
    let outcome = h.service.sync_instance(instance.id).await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.errors, 2);

    let state = h.states.get(instance.id).await.unwrap().unwrap();
    assert_eq!(state.mapping, mapping());
    assert_eq!(state.error_for("s2"), Some(ErrorReason::Exit));
    assert_eq!(state.error_for("s3"), Some(ErrorReason::NotFound));
    assert_eq!(
        h.memberships.record(instance.id, s2).await.unwrap().status,
        MembershipStatus::Suspended
    );
    assert!(h.memberships.record(instance.id, s1).await.unwrap().is_active());

    let rows = h.service.exceptions(instance.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.organisational_unit == "Computer Science"));
}

#[tokio::test]
async fn test_token_unavailable_leaves_state_untouched() {
    let h = harness(FetchFailurePolicy::Reconcile).await;
    let s1 = h.directory.add_account("s1").await;
    mount_members(&h.server, &["s1"]).await;

    let (instance, _) = h
        .service
        .create_instance(NewInstance::for_course(7, "Roster"), mapping())
        .await
        .unwrap();
    let before = h.states.get(instance.id).await.unwrap().unwrap();
    let writes = h.states.writes();
    let records = h.memberships.records().await;

    h.server.reset().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 0})))
        .mount(&h.server)
        .await;

    let outcome = h.service.sync_instance(instance.id).await.unwrap();
    assert!(matches!(
        outcome,
        SyncOutcome::Skipped {
            reason: SkipReason::TokenUnavailable,
            ..
        }
    ));
    assert_eq!(h.states.get(instance.id).await.unwrap().unwrap(), before);
    assert_eq!(h.states.writes(), writes);
    assert_eq!(h.memberships.records().await, records);
    assert!(h.memberships.record(instance.id, s1).await.unwrap().is_active());
}

#[tokio::test]
async fn test_fetch_failure_policies() {
    for (policy, expect_departures) in [
        (FetchFailurePolicy::Reconcile, true),
        (FetchFailurePolicy::Skip, false)
    ] {
        let h = harness(policy).await;
        let s1 = h.directory.add_account("s1").await;
        mount_members(&h.server, &["s1"]).await;
        let (instance, _) = h
            .service
            .create_instance(NewInstance::for_course(7, "Roster"), mapping())
            .await
            .unwrap();

        h.server.reset().await;
        mount_token(&h.server).await;
        Mock::given(method("POST"))
            .and(path("/members"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&h.server)
            .await;

        let outcome = h.service.sync_instance(instance.id).await.unwrap();
        let record = h.memberships.record(instance.id, s1).await.unwrap();
        if expect_departures {
            assert!(outcome.report().is_some());
            assert_eq!(record.status, MembershipStatus::Suspended);
        } else {
            assert!(matches!(
                outcome,
                SyncOutcome::Skipped {
                    reason: SkipReason::FetchUnavailable,
                    ..
                }
            ));
            assert!(record.is_active());
        }
    }
}

#[tokio::test]
async fn test_create_with_new_group_and_skipped_first_run() {
    let h = harness(FetchFailurePolicy::Reconcile).await;
    let s1 = h.directory.add_account("s1").await;

    let mut new_instance = NewInstance::for_course(7, "Roster");
    new_instance.group = GroupTarget::CreateNew;
    let (instance, outcome) = h.service.create_instance(new_instance, mapping()).await.unwrap();

    assert!(matches!(
        outcome,
        SyncOutcome::Skipped {
            reason: SkipReason::TokenUnavailable,
            ..
        }
    ));
    let group_id = instance.group_id.unwrap();
    assert_eq!(
        h.memberships.group_name(group_id).await.as_deref(),
        Some("Data Structures")
    );
    let state = h.states.get(instance.id).await.unwrap().unwrap();
    assert_eq!(state.mapping, mapping());
    assert!(state.success.is_empty());

    mount_members(&h.server, &["s1"]).await;
    h.service.sync_instance(instance.id).await.unwrap();
    assert_eq!(h.memberships.group_members_of(group_id).await, vec![s1]);
}

#[tokio::test]
async fn test_update_moves_group_members() {
    let h = harness(FetchFailurePolicy::Reconcile).await;
    let s1 = h.directory.add_account("s1").await;
    mount_members(&h.server, &["s1"]).await;

    let mut new_instance = NewInstance::for_course(7, "Roster");
    new_instance.group = GroupTarget::Existing(10);
    let (mut instance, _) = h.service.create_instance(new_instance, mapping()).await.unwrap();
    assert_eq!(h.memberships.group_members_of(10).await, vec![s1]);

    instance.group_id = Some(11);
    h.service.update_instance(&instance).await.unwrap();

    assert!(h.memberships.group_members_of(10).await.is_empty());
    assert_eq!(h.memberships.group_members_of(11).await, vec![s1]);
    assert_eq!(h.instances.get(instance.id).await.unwrap().unwrap().group_id, Some(11));
}

#[tokio::test]
async fn test_delete_cascades_state() {
    let h = harness(FetchFailurePolicy::Reconcile).await;
    h.directory.add_account("s1").await;
    mount_members(&h.server, &["s1"]).await;

    let (instance, _) = h
        .service
        .create_instance(NewInstance::for_course(7, "Roster"), mapping())
        .await
        .unwrap();
    assert!(h.service.delete_instance(instance.id).await.unwrap());

    assert!(h.states.get(instance.id).await.unwrap().is_none());
    assert!(h.instances.get(instance.id).await.unwrap().is_none());
    assert_eq!(h.memberships.records().await.len(), 1);
    assert!(h.service.exceptions(instance.id).await.is_err());
}

#[tokio::test]
async fn test_sweep_covers_enabled_instances() {
    let h = harness(FetchFailurePolicy::Reconcile).await;
    h.directory.add_account("s1").await;
    mount_members(&h.server, &["s1"]).await;

    for _ in 0..3 {
        h.service
            .create_instance(NewInstance::for_course(7, "Roster"), mapping())
            .await
            .unwrap();
    }
    let mut disabled = NewInstance::for_course(8, "Disabled");
    disabled.enabled = false;
    h.instances.insert(&disabled, None).await.unwrap();

    let report = h.service.sync_all().await.unwrap();
    assert_eq!(report.reconciled.len(), 3);
    assert!(report.skipped.is_empty());
    assert!(!report.has_errors());
}

#[tokio::test]
async fn test_available_courses() {
    let h = harness(FetchFailurePolicy::Reconcile).await;
    mount_token(&h.server).await;
    Mock::given(method("POST"))
        .and(path("/courses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 1,
            "data": [{"idnumber": "CS101", "category": "Computer Science", "shortname": "Data Structures", "stunum": 60}]
        })))
        .mount(&h.server)
        .await;

    let options = h.service.available_courses("t1001").await;
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].key, mapping().selection_key());
    assert_eq!(options[0].label, "Computer Science-Data Structures-60");
}
