//! Reconciliation tests.

use subenv_core::{Error, IN_TREE};
use subenv_test_utils::{
    FailPoint, FakePlatform, TestContext, TracingMappingStore, fast_settings, owned_record,
};

#[tokio::test]
async fn sync_mirrors_every_non_reserved_environment() {
    let platform = FakePlatform::with_default_catalog()
        .with_environment("test1", "alice", ["payment-api", "core-api"])
        .with_environment("test2", "bob", [])
        .with_environment("test17", "ops", ["fixture"])
        .with_environment("test33", "ops", ["everything"]);
    let ctx = TestContext::build(platform, TracingMappingStore::new(), fast_settings());

    let report = ctx.engine.reconciler.sync().await.expect("sync succeeds");

    assert_eq!(report.synced.len(), 2);
    assert_eq!(report.skipped.len(), 2);
    assert!(report.failures.is_empty());

    let records = ctx.store.snapshot().await;
    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["test1", "test2"]);
    assert_eq!(
        records[0].deployed_services.iter().collect::<Vec<_>>(),
        vec!["core-api", "payment-api"]
    );
    assert_eq!(records[0].last_updated_by, "alice");
    assert!(records[1].deployed_services.is_empty());
    assert!(records.iter().all(|r| r.owning_branch == IN_TREE));
}

#[tokio::test]
async fn sync_preserves_branch_ownership() {
    let platform = FakePlatform::with_default_catalog()
        .with_environment("test4", "ci", ["payment-api", "auth-api"]);
    let store = TracingMappingStore::with_records([owned_record(
        "test4",
        "feature/ABC-4",
        &["payment-api"],
    )]);
    let ctx = TestContext::build(platform, store, fast_settings());

    ctx.engine.reconciler.sync().await.expect("sync succeeds");

    let record = ctx.store.peek("test4").await.expect("record");
    assert_eq!(record.owning_branch, "feature/ABC-4");
    assert_eq!(record.deployed_services.len(), 2);
    assert_eq!(record.last_updated_by, "ci");
}

#[tokio::test]
async fn one_bad_environment_does_not_stop_the_rest() {
    let platform = FakePlatform::with_default_catalog().with_environments(["test1", "test2", "test3"]);
    platform.inject_failure(FailPoint::EnvironmentDetail("test2".to_string()));
    let store = TracingMappingStore::new();
    store.fail_saves_of("test3");
    let ctx = TestContext::build(platform, store, fast_settings());

    let report = ctx.engine.reconciler.sync().await.expect("sync succeeds");

    assert_eq!(report.synced.len(), 1);
    assert_eq!(report.failures.len(), 2);
    assert!(ctx.store.peek("test1").await.is_some());
}

#[tokio::test]
async fn sync_fails_when_the_list_is_unavailable() {
    let platform = FakePlatform::with_default_catalog();
    platform.inject_failure(FailPoint::ListEnvironments);
    let ctx = TestContext::build(platform, TracingMappingStore::new(), fast_settings());

    let err = ctx.engine.reconciler.sync().await.expect_err("list fails");
    assert!(matches!(err, Error::RemoteCall { .. }));
}

#[tokio::test]
async fn forget_refuses_environments_that_still_exist() {
    let platform = FakePlatform::with_default_catalog().with_environments(["test6"]);
    let store = TracingMappingStore::with_records([owned_record("test6", "feature/x", &[])]);
    let ctx = TestContext::build(platform, store, fast_settings());

    let err = ctx
        .engine
        .reconciler
        .forget(&"test6".into())
        .await
        .expect_err("still on the platform");
    assert!(matches!(err, Error::PreconditionFailed { .. }));

    ctx.platform.remove_environment("test6");
    ctx.engine
        .reconciler
        .forget(&"test6".into())
        .await
        .expect("gone remotely");
    assert!(ctx.store.peek("test6").await.is_none());

    let err = ctx
        .engine
        .reconciler
        .forget(&"test6".into())
        .await
        .expect_err("already gone");
    assert!(matches!(err, Error::NotFound(_)));
}
