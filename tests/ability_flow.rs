//! End-to-end checks of the ability pipeline: stored roles and rules in,
//! decisions out.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::db::seed_test_user;
use helpers::{RoleBuilder, TestDb, UserBuilder};
use penumbra::ability::{
    AbilityBuilder, AbilityError, Action, DbRuleStore, Decision, PermissionGate, Rule,
};
use penumbra::storage;
use sea_orm::ConnectionTrait;
use serde_json::json;

fn make_builder(db: &TestDb, cache: bool) -> AbilityBuilder {
    let store = Arc::new(DbRuleStore::new(
        db.connection().clone(),
        Duration::from_millis(5000),
    ));
    AbilityBuilder::new(db.connection().clone(), store, cache)
}

#[tokio::test]
async fn test_rules_load_in_role_priority_order() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let viewer = RoleBuilder::new("viewer")
        .with_priority(10)
        .grant("read", "Post")
        .forbid("update", "Post")
        .create(db.connection())
        .await;
    let admin = RoleBuilder::new("admin")
        .with_priority(100)
        .grant("manage", "all")
        .create(db.connection())
        .await;

    storage::assign_role(db.connection(), &user.subject, &admin.id)
        .await
        .expect("assign failed");
    storage::assign_role(db.connection(), &user.subject, &viewer.id)
        .await
        .expect("assign failed");

    let builder = make_builder(&db, false);
    let ability = builder.build(&user.subject).await.expect("build failed");

    assert_eq!(ability.rules().len(), 3);
    // The admin role has higher priority, so its manage-all rule comes last
    // and overrides the viewer's update denial
    assert!(ability.can(Action::Update, "Post", None));
    assert!(ability.can(Action::Delete, "Comment", None));
}

#[tokio::test]
async fn test_higher_priority_denial_wins() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let viewer = RoleBuilder::new("viewer")
        .with_priority(10)
        .grant("read", "Post")
        .create(db.connection())
        .await;
    let restricted = RoleBuilder::new("restricted")
        .with_priority(100)
        .forbid("read", "Post")
        .create(db.connection())
        .await;

    storage::assign_role(db.connection(), &user.subject, &viewer.id)
        .await
        .expect("assign failed");
    storage::assign_role(db.connection(), &user.subject, &restricted.id)
        .await
        .expect("assign failed");

    let builder = make_builder(&db, false);
    let ability = builder.build(&user.subject).await.expect("build failed");

    assert!(!ability.can(Action::Read, "Post", None));
}

#[tokio::test]
async fn test_user_without_roles_gets_empty_ability() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let builder = make_builder(&db, false);
    let ability = builder.build(&user.subject).await.expect("build failed");

    assert!(ability.rules().is_empty());
    assert!(!ability.can(Action::Read, "Post", None));
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let db = TestDb::new().await;

    let builder = make_builder(&db, false);
    let err = builder.build("ghost").await.unwrap_err();

    assert!(matches!(err, AbilityError::UserNotFound(_)));
}

#[tokio::test]
async fn test_owner_conditions_from_storage() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let editor = RoleBuilder::new("editor")
        .grant_where("update", "Post", json!({"ownerId": 42}))
        .create(db.connection())
        .await;
    storage::assign_role(db.connection(), &user.subject, &editor.id)
        .await
        .expect("assign failed");

    let builder = make_builder(&db, false);
    let ability = builder.build(&user.subject).await.expect("build failed");

    assert!(ability.can(Action::Update, "Post", Some(&json!({"ownerId": 42}))));
    assert!(!ability.can(Action::Update, "Post", Some(&json!({"ownerId": 7}))));
}

#[tokio::test]
async fn test_ability_reused_from_cache_until_invalidated() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let builder = make_builder(&db, true);
    let first = builder.build(&user.subject).await.expect("build failed");
    let second = builder.build(&user.subject).await.expect("build failed");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.rules().is_empty());

    // A role change plus invalidation makes the next build see fresh rules
    let editor = RoleBuilder::new("editor")
        .grant("read", "Post")
        .create(db.connection())
        .await;
    storage::assign_role(db.connection(), &user.subject, &editor.id)
        .await
        .expect("assign failed");
    builder.invalidate(&user.subject);

    let third = builder.build(&user.subject).await.expect("build failed");
    assert!(!Arc::ptr_eq(&second, &third));
    assert!(third.can(Action::Read, "Post", None));
}

#[tokio::test]
async fn test_cache_disabled_always_rebuilds() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let builder = make_builder(&db, false);
    let first = builder.build(&user.subject).await.expect("build failed");
    let second = builder.build(&user.subject).await.expect("build failed");

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.rules(), second.rules());
}

#[tokio::test]
async fn test_store_failure_is_data_unavailable() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let editor = RoleBuilder::new("editor")
        .grant("read", "Post")
        .create(db.connection())
        .await;
    storage::assign_role(db.connection(), &user.subject, &editor.id)
        .await
        .expect("assign failed");

    db.connection()
        .execute_unprepared("DROP TABLE role_rules")
        .await
        .expect("drop failed");

    let builder = make_builder(&db, false);
    let err = builder.build(&user.subject).await.unwrap_err();

    assert!(matches!(err, AbilityError::DataUnavailable(_)));
}

#[tokio::test]
async fn test_slow_store_times_out_as_data_unavailable() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let editor = RoleBuilder::new("editor")
        .grant("read", "Post")
        .create(db.connection())
        .await;
    storage::assign_role(db.connection(), &user.subject, &editor.id)
        .await
        .expect("assign failed");

    // A zero deadline elapses before any query can answer
    let store = Arc::new(DbRuleStore::new(
        db.connection().clone(),
        Duration::from_millis(0),
    ));
    let builder = AbilityBuilder::new(db.connection().clone(), store, false);
    let err = builder.build(&user.subject).await.unwrap_err();

    match err {
        AbilityError::DataUnavailable(msg) => assert!(msg.contains("timed out")),
        other => panic!("expected DataUnavailable, got {other}"),
    }
}

#[tokio::test]
async fn test_malformed_stored_rule_fails_closed() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let editor = RoleBuilder::new("editor")
        .grant("read", "Post")
        .create(db.connection())
        .await;
    storage::assign_role(db.connection(), &user.subject, &editor.id)
        .await
        .expect("assign failed");

    // Corrupt the stored action behind the API's back
    db.connection()
        .execute_unprepared("UPDATE role_rules SET action = 'destroy'")
        .await
        .expect("update failed");

    let builder = make_builder(&db, false);
    let err = builder.build(&user.subject).await.unwrap_err();

    assert!(matches!(err, AbilityError::DataUnavailable(_)));
}

#[tokio::test]
async fn test_concurrent_queries_share_one_snapshot() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let editor = RoleBuilder::new("editor")
        .grant("read", "Post")
        .create(db.connection())
        .await;
    storage::assign_role(db.connection(), &user.subject, &editor.id)
        .await
        .expect("assign failed");

    let builder = make_builder(&db, true);
    let ability = builder.build(&user.subject).await.expect("build failed");

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let ability = Arc::clone(&ability);
        tasks.push(tokio::spawn(async move {
            ability.can(Action::Read, "Post", None) && !ability.can(Action::Delete, "Post", None)
        }));
    }
    for task in tasks {
        assert!(task.await.expect("task panicked"));
    }
}

#[tokio::test]
async fn test_gate_decisions() {
    let db = TestDb::new().await;
    let user = UserBuilder::new("alice").create(db.connection()).await;

    let editor = RoleBuilder::new("editor")
        .grant("read", "Post")
        .create(db.connection())
        .await;
    storage::assign_role(db.connection(), &user.subject, &editor.id)
        .await
        .expect("assign failed");

    let gate = PermissionGate::new(Arc::new(make_builder(&db, true)));

    assert_eq!(
        gate.authorize(None, Action::Read, "Post").await,
        Decision::Unauthenticated
    );
    // Unknown accounts are indistinguishable from missing identities
    assert_eq!(
        gate.authorize(Some("ghost"), Action::Read, "Post").await,
        Decision::Unauthenticated
    );
    assert_eq!(
        gate.authorize(Some(&user.subject), Action::Read, "Post")
            .await,
        Decision::Granted
    );
    assert_eq!(
        gate.authorize(Some(&user.subject), Action::Delete, "Post")
            .await,
        Decision::Denied
    );
}

#[tokio::test]
async fn test_gate_denies_when_rules_unavailable() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let editor = RoleBuilder::new("editor")
        .grant("read", "Post")
        .create(db.connection())
        .await;
    storage::assign_role(db.connection(), &user.subject, &editor.id)
        .await
        .expect("assign failed");

    db.connection()
        .execute_unprepared("DROP TABLE role_rules")
        .await
        .expect("drop failed");

    let gate = PermissionGate::new(Arc::new(make_builder(&db, false)));
    assert_eq!(
        gate.authorize(Some(&user.subject), Action::Read, "Post")
            .await,
        Decision::Denied
    );
}

#[tokio::test]
async fn test_rule_serialization_round_trip() {
    let db = TestDb::new().await;
    let user = seed_test_user(db.connection(), "alice", "password123").await;

    let editor = RoleBuilder::new("editor")
        .grant("read", "Post")
        .grant_where("update", "Post", json!({"ownerId": 42}))
        .forbid_where("delete", "Post", json!({"locked": true}))
        .create(db.connection())
        .await;
    storage::assign_role(db.connection(), &user.subject, &editor.id)
        .await
        .expect("assign failed");

    let builder = make_builder(&db, false);
    let ability = builder.build(&user.subject).await.expect("build failed");

    let encoded = serde_json::to_string(ability.rules()).expect("encode failed");
    let decoded: Vec<Rule> = serde_json::from_str(&encoded).expect("decode failed");

    assert_eq!(decoded.as_slice(), ability.rules());
    assert_eq!(decoded[0].action, Action::Read);
    assert!(decoded[2].inverted);
}
