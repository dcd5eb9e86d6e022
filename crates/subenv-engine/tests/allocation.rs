//! Allocation tests against the fake platform.

use std::time::Duration;

use subenv_core::{Error, IN_TREE};
use subenv_engine::AllocationOutcome;
use subenv_test_utils::{
    FailPoint, FakePlatform, PlatformOp, TestContext, TracingMappingStore, fast_settings,
    init_test_logging, owned_record, request, small_pool_settings,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn stable_branches_never_touch_the_store() {
    init_test_logging();
    let ctx = TestContext::new();

    for branch in ["main", "master", "release", "develop", "dev"] {
        let outcome = ctx
            .engine
            .allocator
            .allocate(&request(branch, "payment-api"), &CancellationToken::new())
            .await
            .expect("stable branch is not an error");
        assert!(matches!(outcome, AllocationOutcome::Skipped { .. }));
    }

    assert!(ctx.store.untouched());
    assert!(ctx.platform.operations().is_empty());
}

#[tokio::test]
async fn unrecognized_branch_fails_without_side_effects() {
    let ctx = TestContext::new();

    for branch in ["hotfix/urgent", "bugfix/ABC-2", "", "feature/"] {
        let err = ctx
            .engine
            .allocator
            .allocate(&request(branch, "payment-api"), &CancellationToken::new())
            .await
            .expect_err("branch must be rejected");
        assert!(matches!(err, Error::UnrecognizedBranch { .. }), "{branch}: {err}");
    }

    assert!(ctx.store.untouched());
    assert!(ctx.platform.operations().is_empty());
    assert!(ctx.platform.submitted().is_empty());
}

#[tokio::test]
async fn new_branch_provisions_the_only_free_slot() {
    init_test_logging();
    let platform = FakePlatform::with_default_catalog()
        .with_environments(["test1", "test2", "test3", "test4"])
        .with_ready_after(2);
    let ctx = TestContext::build(platform, TracingMappingStore::new(), small_pool_settings(5));

    let outcome = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-1", "payment-api"), &CancellationToken::new())
        .await
        .expect("allocation succeeds");

    let AllocationOutcome::Provisioned { environment, task } = outcome else {
        panic!("expected a new environment, got {outcome:?}");
    };
    assert_eq!(environment.as_str(), "test5");

    let created = ctx.platform.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].id.as_str(), "test5");
    assert_eq!(created[0].base_environment, "test33");
    assert_eq!(created[0].charts.len(), 4);

    // Bootstrap first, then the requested service.
    let submitted = ctx.platform.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].target.service_name, "backoffice-v1-web-app");
    assert_eq!(submitted[0].repo.branch, "feature/app/ABC-1");
    assert_eq!(submitted[1].target.service_name, "payment-api");
    assert_eq!(submitted[1].repo.branch, "feature/ABC-1");
    assert_eq!(task.task_id, 2);

    // Readiness was polled until the platform reported success.
    let polls = ctx
        .platform
        .count(|op| matches!(op, PlatformOp::EnvironmentDetail { id } if id == "test5"));
    assert!(polls >= 3, "polled {polls} times");

    let record = ctx.store.peek("test5").await.expect("record saved");
    assert_eq!(record.owning_branch, "feature/ABC-1");
    assert!(record.has_service("backoffice-v1-web-app"));
    assert!(record.has_service("payment-api"));
    assert!(ctx.platform.services_of("test5").contains(&"payment-api".to_string()));
}

#[tokio::test]
async fn pool_of_three_picks_the_single_free_slot() {
    let platform = FakePlatform::with_default_catalog().with_environments(["test1", "test2"]);
    let ctx = TestContext::build(platform, TracingMappingStore::new(), small_pool_settings(3));

    let outcome = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-3", "auth-api"), &CancellationToken::new())
        .await
        .expect("allocation succeeds");

    assert_eq!(outcome.environment().map(|e| e.as_str()), Some("test3"));
    let created: Vec<_> = ctx.platform.created().into_iter().map(|c| c.id).collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].as_str(), "test3");
}

#[tokio::test]
async fn exhausted_pool_creates_nothing() {
    let platform = FakePlatform::with_default_catalog().with_environments(["test1", "test2"]);
    let ctx = TestContext::build(platform, TracingMappingStore::new(), small_pool_settings(2));

    let err = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-4", "auth-api"), &CancellationToken::new())
        .await
        .expect_err("pool is full");

    assert!(matches!(err, Error::PoolExhausted { pool_size: 2 }));
    assert_eq!(
        ctx.platform
            .count(|op| matches!(op, PlatformOp::CreateEnvironment { .. })),
        0
    );
    assert!(ctx.platform.submitted().is_empty());
}

#[tokio::test]
async fn owned_environment_is_reused() {
    let platform = FakePlatform::with_default_catalog()
        .with_environment("test7", "dev@example.com", ["backoffice-v1-web-app"]);
    let store = TracingMappingStore::with_records([owned_record(
        "test7",
        "feature/ABC-7",
        &["backoffice-v1-web-app"],
    )]);
    let ctx = TestContext::build(platform, store, fast_settings());

    let outcome = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-7", "core-api"), &CancellationToken::new())
        .await
        .expect("allocation succeeds");

    assert!(matches!(outcome, AllocationOutcome::Reused { ref environment, .. } if environment.as_str() == "test7"));
    assert!(ctx.platform.created().is_empty());
    assert_eq!(
        ctx.platform.count(|op| matches!(op, PlatformOp::AddService { id, service } if id == "test7" && service == "core-api")),
        1
    );
    let record = ctx.store.peek("test7").await.expect("record kept");
    assert_eq!(record.deployed_services.len(), 2);
}

#[tokio::test]
async fn redeploying_a_service_keeps_set_semantics() {
    let platform = FakePlatform::with_default_catalog()
        .with_environment("test8", "dev@example.com", ["payment-api"]);
    let store = TracingMappingStore::with_records([owned_record(
        "test8",
        "feature/ABC-8",
        &["payment-api"],
    )]);
    let ctx = TestContext::build(platform, store, fast_settings());

    for _ in 0..2 {
        ctx.engine
            .allocator
            .allocate(&request("feature/ABC-8", "payment-api"), &CancellationToken::new())
            .await
            .expect("allocation succeeds");
    }

    let record = ctx.store.peek("test8").await.expect("record kept");
    assert_eq!(record.deployed_services.len(), 1);
    // Already present: no chart install, but both deployments were submitted.
    assert_eq!(
        ctx.platform
            .count(|op| matches!(op, PlatformOp::AddService { .. })),
        0
    );
    assert_eq!(ctx.platform.submitted().len(), 2);
}

#[tokio::test]
async fn stale_store_is_synced_before_provisioning() {
    // The platform knows test2 but the store is empty, so the branch has no
    // owner yet and a new slot is provisioned. test2 ends up as in-tree.
    let platform = FakePlatform::with_default_catalog()
        .with_environment("test2", "ops", ["core-api"]);
    let ctx = TestContext::build(platform, TracingMappingStore::new(), small_pool_settings(3));

    let outcome = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-9", "core-api"), &CancellationToken::new())
        .await
        .expect("allocation succeeds");

    assert!(matches!(outcome, AllocationOutcome::Provisioned { .. }));
    assert_ne!(outcome.environment().map(|e| e.as_str()), Some("test2"));
    let synced = ctx.store.peek("test2").await.expect("synced record");
    assert_eq!(synced.owning_branch, IN_TREE);
}

#[tokio::test]
async fn unknown_service_fails_before_consuming_a_slot() {
    let ctx = TestContext::build(
        FakePlatform::with_default_catalog(),
        TracingMappingStore::new(),
        small_pool_settings(3),
    );

    let err = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-5", "no-such-service"), &CancellationToken::new())
        .await
        .expect_err("service is not deployable");

    assert!(matches!(err, Error::ServiceNotFound { .. }));
    assert!(ctx.platform.created().is_empty());
}

#[tokio::test]
async fn catalog_service_without_a_name_mapping_deploys_under_its_own_name() {
    let platform = FakePlatform::with_default_catalog().with_charts([("brand-new-svc", "1.0.0")]);
    let ctx = TestContext::build(platform, TracingMappingStore::new(), small_pool_settings(2));

    let outcome = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-9", "brand-new-svc"), &CancellationToken::new())
        .await
        .expect("catalog service is deployable");

    assert!(matches!(outcome, AllocationOutcome::Provisioned { .. }));
    let submitted = ctx.platform.submitted();
    let deploy = submitted.last().expect("service deployment submitted");
    assert_eq!(deploy.target.service_name, "brand-new-svc");
    assert_eq!(deploy.target.service_module, "brand-new-svc");
    assert_eq!(deploy.target.build_name, "brand-new-svc");
    assert_eq!(deploy.repo.repo_name, "brand-new-svc");
}

#[tokio::test]
async fn variant_only_service_without_a_matching_branch_is_not_found() {
    let platform =
        FakePlatform::with_default_catalog().with_charts([("core-event-consumer", "2.0.0")]);
    let ctx = TestContext::build(platform, TracingMappingStore::new(), small_pool_settings(2));

    let err = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-15", "core-event-consumer"), &CancellationToken::new())
        .await
        .expect_err("no variant matches the branch");

    assert!(matches!(err, Error::ServiceNotFound { .. }), "{err}");
    assert!(ctx.platform.created().is_empty());
}

#[tokio::test]
async fn failed_save_on_reuse_stops_the_deployment() {
    let platform = FakePlatform::with_default_catalog()
        .with_environment("test7", "dev@example.com", ["backoffice-v1-web-app"]);
    let store = TracingMappingStore::with_records([owned_record(
        "test7",
        "feature/ABC-7",
        &["backoffice-v1-web-app"],
    )]);
    store.fail_saves_of("test7");
    let ctx = TestContext::build(platform, store, fast_settings());

    let err = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-7", "core-api"), &CancellationToken::new())
        .await
        .expect_err("save fails");

    assert!(matches!(err, Error::Storage { .. }), "{err}");
    let record = ctx.store.peek("test7").await.expect("record kept");
    assert!(!record.has_service("core-api"));
    assert!(ctx.platform.submitted().is_empty());
}

#[tokio::test]
async fn failed_save_after_provisioning_is_reported() {
    let store = TracingMappingStore::new();
    store.fail_saves_of("test1");
    let ctx = TestContext::build(FakePlatform::with_default_catalog(), store, small_pool_settings(1));

    let err = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-16", "payment-api"), &CancellationToken::new())
        .await
        .expect_err("save fails");

    assert!(matches!(err, Error::Storage { .. }), "{err}");
    assert!(ctx.store.snapshot().await.is_empty());
    // Only the bootstrap went out; the requested service was never deployed.
    assert_eq!(ctx.platform.submitted().len(), 1);
}

#[tokio::test]
async fn bootstrap_failure_writes_no_record() {
    let platform = FakePlatform::with_default_catalog();
    platform.inject_failure(FailPoint::SubmitBuild(
        "fat-base-envrionment-build-backoffice-v1-web-1".to_string(),
    ));
    let ctx = TestContext::build(platform, TracingMappingStore::new(), small_pool_settings(2));

    let err = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-6", "payment-api"), &CancellationToken::new())
        .await
        .expect_err("bootstrap fails");

    assert!(matches!(err, Error::Submission { .. }), "{err}");
    assert!(ctx.store.snapshot().await.is_empty());
}

#[tokio::test]
async fn environment_that_never_becomes_ready_times_out() {
    let mut settings = small_pool_settings(1);
    settings.readiness.timeout = Duration::from_millis(60);
    let ctx = TestContext::build(
        FakePlatform::with_default_catalog().never_ready(),
        TracingMappingStore::new(),
        settings,
    );

    let err = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-10", "payment-api"), &CancellationToken::new())
        .await
        .expect_err("never ready");

    assert!(matches!(err, Error::Timeout { .. }), "{err}");
    assert!(ctx.platform.submitted().is_empty());
}

#[tokio::test]
async fn failed_environment_aborts_provisioning() {
    let ctx = TestContext::build(
        FakePlatform::with_default_catalog().with_created_status("error"),
        TracingMappingStore::new(),
        small_pool_settings(1),
    );

    let err = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-11", "payment-api"), &CancellationToken::new())
        .await
        .expect_err("environment failed");

    assert!(matches!(err, Error::EnvironmentFailed { .. }), "{err}");
}

#[tokio::test]
async fn cancellation_interrupts_the_readiness_wait() {
    let ctx = TestContext::build(
        FakePlatform::with_default_catalog().never_ready(),
        TracingMappingStore::new(),
        small_pool_settings(1),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = ctx
        .engine
        .allocator
        .allocate(&request("feature/ABC-12", "payment-api"), &cancel)
        .await
        .expect_err("cancelled");

    assert!(matches!(err, Error::Cancelled { .. }), "{err}");
}

#[tokio::test]
async fn concurrent_requests_for_one_branch_share_an_environment() {
    let ctx = TestContext::build(
        FakePlatform::with_default_catalog().with_ready_after(3),
        TracingMappingStore::new(),
        small_pool_settings(10),
    );
    let allocator = ctx.engine.allocator.clone();
    let other = ctx.engine.allocator.clone();

    let (a, b) = tokio::join!(
        async move {
            allocator
                .allocate(&request("feature/ABC-13", "payment-api"), &CancellationToken::new())
                .await
        },
        async move {
            other
                .allocate(&request("feature/ABC-13", "auth-api"), &CancellationToken::new())
                .await
        },
    );

    let a = a.expect("first allocation");
    let b = b.expect("second allocation");
    assert_eq!(a.environment(), b.environment());
    assert_eq!(ctx.platform.created().len(), 1);
}

#[tokio::test]
async fn manual_deploy_requires_a_record() {
    let ctx = TestContext::new();
    let err = ctx
        .engine
        .allocator
        .deploy_to(&"test4".into(), &request("feature/ABC-14", "core-api"))
        .await
        .expect_err("no record");
    assert!(matches!(err, Error::NotFound(_)));
}
