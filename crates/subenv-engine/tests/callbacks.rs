//! Webhook correlation tests.

use subenv_engine::correlator::CallbackOutcome;
use subenv_engine::platform::{JobInfo, JobRepo, JobSpec, TaskDetail, TaskJob, TaskParam, TaskStage};
use subenv_engine::NotifyTarget;
use subenv_test_utils::{
    FailPoint, PlatformOp, TestContext, callback, failed_callback, init_test_logging,
};

fn detail(env: &str, jobs: &[(&str, &str)]) -> TaskDetail {
    TaskDetail {
        task_id: 41,
        workflow_key: "test33".to_string(),
        params: vec![TaskParam {
            name: "环境".to_string(),
            value: env.to_string(),
        }],
        stages: vec![TaskStage {
            name: "构建".to_string(),
            jobs: jobs
                .iter()
                .map(|(service, branch)| TaskJob {
                    name: "构建发布".to_string(),
                    status: "passed".to_string(),
                    job_info: JobInfo {
                        service_name: (*service).to_string(),
                    },
                    spec: JobSpec {
                        repos: vec![JobRepo {
                            repo_name: (*service).to_string(),
                            branch: (*branch).to_string(),
                        }],
                    },
                })
                .collect(),
        }],
    }
}

#[tokio::test]
async fn passed_deployment_notifies_the_requester() {
    init_test_logging();
    let ctx = TestContext::new();
    ctx.platform.put_task_detail(
        41,
        detail("test5", &[("payment-api", "feature/ABC-1"), ("core-api", "feature/ABC-1-core")]),
    );

    let outcome = ctx
        .engine
        .correlator
        .on_callback(&callback("test33", "passed", 41))
        .await
        .expect("callback handled");

    assert_eq!(
        outcome,
        CallbackOutcome::Notified {
            target: NotifyTarget::User("dev@example.com".to_string())
        }
    );
    assert_eq!(
        ctx.platform.count(|op| matches!(op, PlatformOp::TaskDetail { task_id: 41, .. })),
        1
    );

    let sent = ctx.notifier.sent();
    assert_eq!(sent.len(), 1);
    let vars = &sent[0].variables;
    assert_eq!(sent[0].template_id, "ctp_AAz7KWuUUkkh");
    assert_eq!(vars["sub_env"], "test5");
    assert_eq!(vars["service"], "payment-api\ncore-api");
    assert_eq!(vars["branch"], "feature/ABC-1\nfeature/ABC-1-core");
    assert_eq!(vars["workflow_number"], "41");
    assert_eq!(vars["duration"], "02:05");
}

#[tokio::test]
async fn failed_deployment_sends_one_incident_listing_failed_jobs() {
    let ctx = TestContext::new();

    ctx.engine
        .correlator
        .on_callback(&failed_callback("test33", 7, &["build-A", "build-B"]))
        .await
        .expect("callback handled");

    let sent = ctx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0].target, NotifyTarget::Group(g) if g == "Engineering Incident Report Group"));
    let lines: Vec<_> = sent[0].variables["content"].lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("build-A"));
    assert!(lines[1].ends_with("build-B"));
    assert!(!sent[0].variables["content"].contains("healthy-job"));
    // No detail fetch on the failure path.
    assert_eq!(
        ctx.platform.count(|op| matches!(op, PlatformOp::TaskDetail { .. })),
        0
    );
}

#[tokio::test]
async fn domain_monitor_routes_to_groups() {
    let ctx = TestContext::new();

    ctx.engine
        .correlator
        .on_callback(&callback("domain-monitor", "passed", 1))
        .await
        .expect("passed monitor");
    ctx.engine
        .correlator
        .on_callback(&failed_callback("domain-monitor", 2, &["expiring.example.com"]))
        .await
        .expect("failed monitor");

    let sent = ctx.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].target, NotifyTarget::Group("Devops Notification".to_string()));
    assert_eq!(sent[0].template_id, "ctp_AAzXWvvEaFd5");
    assert_eq!(
        sent[1].target,
        NotifyTarget::Group("Engineering Incident Report Group".to_string())
    );
    assert!(sent[1].variables["content"].contains("expiring.example.com"));
}

#[tokio::test]
async fn unknown_workflow_is_ignored() {
    let ctx = TestContext::new();

    let outcome = ctx
        .engine
        .correlator
        .on_callback(&callback("nightly-backup", "passed", 3))
        .await
        .expect("not an error");

    assert!(matches!(outcome, CallbackOutcome::Ignored { .. }));
    assert!(ctx.notifier.sent().is_empty());
    assert!(ctx.platform.operations().is_empty());
}

#[tokio::test]
async fn failed_callback_without_stages_still_notifies() {
    let ctx = TestContext::new();

    ctx.engine
        .correlator
        .on_callback(&callback("test33", "failed", 9))
        .await
        .expect("callback handled");

    let sent = ctx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].variables["content"], "");
}

#[tokio::test]
async fn detail_fetch_failure_is_reported() {
    let ctx = TestContext::new();
    ctx.platform.inject_failure(FailPoint::TaskDetail);

    let result = ctx
        .engine
        .correlator
        .on_callback(&callback("test33", "passed", 5))
        .await;

    assert!(result.is_err());
    assert!(ctx.notifier.sent().is_empty());
}

#[tokio::test]
async fn notification_failure_is_reported() {
    let ctx = TestContext::new();
    ctx.notifier.fail_sends(true);

    let result = ctx
        .engine
        .correlator
        .on_callback(&callback("domain-monitor", "passed", 1))
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn submitted_task_detail_round_trips_into_notification() {
    let ctx = TestContext::new();
    let task = ctx
        .engine
        .correlator
        .submit_deployment(&"test12".into(), "inventory-svc", "feature/stockjob-fix", "dev@example.com")
        .await
        .expect("submitted");

    ctx.engine
        .correlator
        .on_callback(&callback("test33", "passed", task.task_id))
        .await
        .expect("callback handled");

    let sent = ctx.notifier.sent();
    assert_eq!(sent[0].variables["sub_env"], "test12");
    assert_eq!(sent[0].variables["service"], "inventory-stockjob");
    assert_eq!(sent[0].variables["branch"], "feature/stockjob-fix");
}
