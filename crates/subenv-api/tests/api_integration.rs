//! API integration tests.
//!
//! Tests the complete request flow: HTTP → routes → engine → fake platform
//! and mapping store.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use subenv_api::server::ServerBuilder;
use subenv_test_utils::{
    FakePlatform, PlatformOp, TestContext, TracingMappingStore, callback_json, fast_settings,
    owned_record, small_pool_settings,
};

fn router_for(ctx: &TestContext) -> axum::Router {
    ServerBuilder::new(ctx.engine.clone())
        .debug(true)
        .build()
        .test_router()
}

mod helpers {
    use super::*;

    pub fn make_request(method: Method, uri: &str, body: Option<Value>) -> Result<Request<Body>> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");

        let body = match body {
            Some(v) => Body::from(serde_json::to_vec(&v).context("serialize request body")?),
            None => Body::empty(),
        };

        builder.body(body).context("build request")
    }

    pub async fn send(
        router: axum::Router,
        request: Request<Body>,
    ) -> Result<axum::response::Response> {
        let response = router.oneshot(request).await.map_err(|err| -> anyhow::Error { match err {} })?;
        Ok(response)
    }

    pub async fn json_body(response: axum::response::Response) -> Result<(StatusCode, Value)> {
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .context("read response body")?;
        let json = serde_json::from_slice(&body).with_context(|| {
            format!(
                "parse JSON response (status={status}): {}",
                String::from_utf8_lossy(&body)
            )
        })?;
        Ok((status, json))
    }

    pub async fn get_json(router: axum::Router, uri: &str) -> Result<(StatusCode, Value)> {
        let request = make_request(Method::GET, uri, None)?;
        json_body(send(router, request).await?).await
    }

    pub async fn post_json(
        router: axum::Router,
        uri: &str,
        body: Value,
    ) -> Result<(StatusCode, Value)> {
        let request = make_request(Method::POST, uri, Some(body))?;
        json_body(send(router, request).await?).await
    }

    pub async fn delete(router: axum::Router, uri: &str) -> Result<StatusCode> {
        let request = make_request(Method::DELETE, uri, None)?;
        let response = send(router, request).await?;
        Ok(response.status())
    }

    pub fn allocation(branch: &str, service: &str) -> Value {
        serde_json::json!({
            "branch": branch,
            "service": service,
            "requester": "dev@example.com"
        })
    }
}

// ============================================================================
// Allocation Tests
// ============================================================================

mod allocations {
    use super::*;

    #[tokio::test]
    async fn test_new_branch_gets_a_provisioned_environment() -> Result<()> {
        let platform = FakePlatform::with_default_catalog().with_environments(["test1", "test2"]);
        let ctx = TestContext::build(platform, TracingMappingStore::new(), small_pool_settings(3));

        let (status, body) = helpers::post_json(
            router_for(&ctx),
            "/api/v1/allocations",
            helpers::allocation("feature/ABC-1", "payment-api"),
        )
        .await?;

        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["outcome"], "provisioned");
        assert_eq!(body["environment"], "test3");
        assert_eq!(body["branch"], "feature/ABC-1");
        assert!(body["task"]["task_id"].as_u64().is_some());

        let record = ctx.store.peek("test3").await.context("record saved")?;
        assert_eq!(record.owning_branch, "feature/ABC-1");
        Ok(())
    }

    #[tokio::test]
    async fn test_owned_environment_is_reused() -> Result<()> {
        let platform = FakePlatform::with_default_catalog().with_environment(
            "test7",
            "dev@example.com",
            ["backoffice-v1-web-app"],
        );
        let store = TracingMappingStore::with_records([owned_record(
            "test7",
            "feature/ABC-7",
            &["backoffice-v1-web-app"],
        )]);
        let ctx = TestContext::build(platform, store, fast_settings());

        let (status, body) = helpers::post_json(
            router_for(&ctx),
            "/api/v1/allocations",
            helpers::allocation("feature/ABC-7", "core-api"),
        )
        .await?;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["outcome"], "reused");
        assert_eq!(body["environment"], "test7");
        assert!(ctx.platform.created().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_stable_branch_is_skipped() -> Result<()> {
        let ctx = TestContext::new();

        let (status, body) = helpers::post_json(
            router_for(&ctx),
            "/api/v1/allocations",
            helpers::allocation("master", "payment-api"),
        )
        .await?;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "skipped");
        assert!(body.get("environment").is_none());
        assert!(ctx.store.untouched());
        Ok(())
    }

    #[tokio::test]
    async fn test_unrecognized_branch_is_a_bad_request() -> Result<()> {
        let ctx = TestContext::new();

        let request = helpers::make_request(
            Method::POST,
            "/api/v1/allocations",
            Some(helpers::allocation("hotfix/urgent", "payment-api")),
        )?;
        let response = helpers::send(router_for(&ctx), request).await?;
        assert!(response.headers().contains_key("x-request-id"));

        let (status, body) = helpers::json_body(response).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "UNRECOGNIZED_BRANCH");
        assert!(body["requestId"].as_str().is_some());
        assert!(ctx.platform.operations().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_service_is_rejected() -> Result<()> {
        let ctx = TestContext::new();

        let (status, body) = helpers::post_json(
            router_for(&ctx),
            "/api/v1/allocations",
            helpers::allocation("feature/ABC-1", "  "),
        )
        .await?;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
        assert!(ctx.store.untouched());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_found() -> Result<()> {
        let ctx = TestContext::new();

        let (status, body) = helpers::post_json(
            router_for(&ctx),
            "/api/v1/allocations",
            helpers::allocation("feature/ABC-5", "no-such-service"),
        )
        .await?;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "SERVICE_NOT_FOUND");
        assert!(ctx.platform.created().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausted_pool_asks_client_to_retry_later() -> Result<()> {
        let platform = FakePlatform::with_default_catalog().with_environments(["test1", "test2"]);
        let ctx = TestContext::build(platform, TracingMappingStore::new(), small_pool_settings(2));

        let request = helpers::make_request(
            Method::POST,
            "/api/v1/allocations",
            Some(helpers::allocation("feature/ABC-4", "auth-api")),
        )?;
        let response = helpers::send(router_for(&ctx), request).await?;
        assert_eq!(
            response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok()),
            Some("60")
        );

        let (status, body) = helpers::json_body(response).await?;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "POOL_EXHAUSTED");
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() -> Result<()> {
        let ctx = TestContext::new();

        let request = helpers::make_request(
            Method::POST,
            "/api/v1/allocations",
            Some(serde_json::json!({ "branch": "feature/ABC-1" })),
        )?;
        let status = helpers::send(router_for(&ctx), request).await?.status();

        assert!(status.is_client_error());
        assert!(ctx.store.untouched());
        Ok(())
    }
}

// ============================================================================
// Webhook Tests
// ============================================================================

mod webhooks {
    use super::*;

    #[tokio::test]
    async fn test_failed_deployment_notifies_incident_group() -> Result<()> {
        let ctx = TestContext::new();

        let (status, body) = helpers::post_json(
            router_for(&ctx),
            "/api/v1/webhooks/deployment",
            callback_json("test33", "failed", 7),
        )
        .await?;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["acknowledged"], true);
        assert_eq!(body["result"], "notified");
        assert!(body["detail"].as_str().is_some_and(|d| d.starts_with("group:")));
        assert_eq!(ctx.notifier.sent().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_ignored() -> Result<()> {
        let ctx = TestContext::new();

        let (status, body) = helpers::post_json(
            router_for(&ctx),
            "/api/v1/webhooks/deployment",
            callback_json("nightly-build", "passed", 3),
        )
        .await?;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "ignored");
        assert!(ctx.notifier.sent().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_handling_failure_still_acknowledges() -> Result<()> {
        let ctx = TestContext::new();
        ctx.notifier.fail_sends(true);

        let (status, body) = helpers::post_json(
            router_for(&ctx),
            "/api/v1/webhooks/deployment",
            callback_json("test33", "failed", 8),
        )
        .await?;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["acknowledged"], true);
        assert!(body.get("result").is_none());
        assert!(body["error"].as_str().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_unparseable_payload_is_rejected() -> Result<()> {
        let ctx = TestContext::new();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/deployment")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"workflow\": 42"))
            .context("build request")?;
        let (status, body) = helpers::json_body(helpers::send(router_for(&ctx), request).await?).await?;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
        assert!(ctx.notifier.sent().is_empty());
        Ok(())
    }
}

// ============================================================================
// Environment Administration Tests
// ============================================================================

mod environments {
    use super::*;

    fn seeded() -> TestContext {
        let platform = FakePlatform::with_default_catalog()
            .with_environment("test4", "ops", ["backoffice-v1-web-app"])
            .with_environment("test2", "ops", ["payment-api"]);
        let store = TracingMappingStore::with_records([
            owned_record("test4", "feature/ABC-4", &["backoffice-v1-web-app"]),
            owned_record("test9", "feature/ABC-9", &["auth-api"]),
        ]);
        TestContext::build(platform, store, fast_settings())
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_id() -> Result<()> {
        let ctx = seeded();

        let (status, body) = helpers::get_json(router_for(&ctx), "/api/v1/environments").await?;

        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["environments"]
            .as_array()
            .context("environments array")?
            .iter()
            .filter_map(|e| e["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["test4", "test9"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_sync_records_platform_environments() -> Result<()> {
        let ctx = seeded();

        let (status, body) =
            helpers::post_json(router_for(&ctx), "/api/v1/environments/sync", Value::Null).await?;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["synced"], serde_json::json!(["test2", "test4"]));
        assert!(body["completed_at"].as_str().is_some());

        let test2 = ctx.store.peek("test2").await.context("test2 recorded")?;
        assert_eq!(test2.owning_branch, subenv_core::IN_TREE);
        let test4 = ctx.store.peek("test4").await.context("test4 kept")?;
        assert_eq!(test4.owning_branch, "feature/ABC-4");
        Ok(())
    }

    #[tokio::test]
    async fn test_get_one_syncs_first() -> Result<()> {
        let ctx = seeded();

        let (status, body) =
            helpers::get_json(router_for(&ctx), "/api/v1/environments/test2").await?;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["id"], "test2");
        assert_eq!(body["deployed_services"], serde_json::json!(["payment-api"]));
        assert!(
            ctx.platform
                .count(|op| matches!(op, PlatformOp::ListEnvironments))
                >= 1
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() -> Result<()> {
        let ctx = seeded();

        let (status, body) =
            helpers::get_json(router_for(&ctx), "/api/v1/environments/test40").await?;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
        Ok(())
    }

    #[tokio::test]
    async fn test_forget_vanished_environment() -> Result<()> {
        let ctx = seeded();

        let status = helpers::delete(router_for(&ctx), "/api/v1/environments/test9").await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(ctx.store.peek("test9").await.is_none());

        let status = helpers::delete(router_for(&ctx), "/api/v1/environments/test9").await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn test_forget_live_environment_conflicts() -> Result<()> {
        let ctx = seeded();

        let status = helpers::delete(router_for(&ctx), "/api/v1/environments/test4").await?;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(ctx.store.peek("test4").await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_deploy_into_known_environment() -> Result<()> {
        let ctx = seeded();

        let (status, body) = helpers::post_json(
            router_for(&ctx),
            "/api/v1/environments/test4/services",
            serde_json::json!({
                "service": "core-api",
                "branch": "feature/ABC-4",
                "requester": "dev@example.com"
            }),
        )
        .await?;

        assert_eq!(status, StatusCode::ACCEPTED, "{body}");
        assert_eq!(body["environment"], "test4");
        assert!(body["task"]["task_id"].as_u64().is_some());

        let record = ctx.store.peek("test4").await.context("record kept")?;
        assert!(record.has_service("core-api"));
        assert_eq!(record.owning_branch, "feature/ABC-4");
        Ok(())
    }

    #[tokio::test]
    async fn test_deploy_into_unknown_environment_is_not_found() -> Result<()> {
        let ctx = seeded();

        let (status, _) = helpers::post_json(
            router_for(&ctx),
            "/api/v1/environments/test40/services",
            serde_json::json!({
                "service": "core-api",
                "branch": "feature/ABC-4",
                "requester": "dev@example.com"
            }),
        )
        .await?;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(ctx.platform.submitted().is_empty());
        Ok(())
    }
}

// ============================================================================
// Chart and Plumbing Tests
// ============================================================================

mod plumbing {
    use super::*;

    #[tokio::test]
    async fn test_chart_catalog_is_listed() -> Result<()> {
        let ctx = TestContext::new();

        let (status, body) = helpers::get_json(router_for(&ctx), "/api/v1/charts").await?;

        assert_eq!(status, StatusCode::OK);
        let charts = body["charts"].as_array().context("charts array")?;
        assert!(
            charts
                .iter()
                .any(|c| c["service_name"] == "payment-api" && c["chart_version"] == "3.2.1")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders() -> Result<()> {
        subenv_api::metrics::init_metrics()?;
        let ctx = TestContext::new();

        // An error response first, so its code shows up in the exposition.
        let (status, _) = helpers::post_json(
            router_for(&ctx),
            "/api/v1/allocations",
            helpers::allocation("hotfix/urgent", "payment-api"),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = helpers::make_request(Method::GET, "/metrics", None)?;
        let response = helpers::send(router_for(&ctx), request).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .context("read metrics body")?;
        let rendered = String::from_utf8_lossy(&body);
        assert!(rendered.contains("subenv_api_errors_total"));
        assert!(rendered.contains("code=\"UNRECOGNIZED_BRANCH\""));
        Ok(())
    }

    #[tokio::test]
    async fn test_browser_preflight_gets_no_cors_headers() -> Result<()> {
        let ctx = TestContext::new();

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/allocations")
            .header("Origin", "http://localhost:3000")
            .header("Access-Control-Request-Method", "POST")
            .body(Body::empty())
            .context("build request")?;

        let response = helpers::send(router_for(&ctx), request).await?;
        assert!(
            !response
                .headers()
                .contains_key("access-control-allow-origin")
        );
        Ok(())
    }
}
