//! `OpenAPI` (3.1) specification generation for `subenv-api`.
//!
//! The generated document is what client teams build their tooling against.

use utoipa::OpenApi;

/// `OpenAPI` documentation for the allocator REST API (`/api/v1/*`).
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Sub-environment Allocator API",
        description = "Branch to sub-environment allocation, deployment webhooks and cache administration"
    ),
    paths(
        crate::routes::allocations::allocate,
        crate::routes::webhooks::deployment_callback,
        crate::routes::environments::list_environments,
        crate::routes::environments::sync_environments,
        crate::routes::environments::get_environment,
        crate::routes::environments::forget_environment,
        crate::routes::environments::deploy_service,
        crate::routes::charts::list_charts,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::routes::allocations::AllocationRequestBody,
            crate::routes::allocations::AllocationResponse,
            crate::routes::allocations::TaskResponse,
            crate::routes::webhooks::WebhookResponse,
            crate::routes::environments::EnvironmentResponse,
            crate::routes::environments::ListEnvironmentsResponse,
            crate::routes::environments::SyncResponse,
            crate::routes::environments::SyncFailureResponse,
            crate::routes::environments::DeployServiceRequest,
            crate::routes::environments::DeployServiceResponse,
            crate::routes::charts::ChartResponse,
            crate::routes::charts::ListChartsResponse,
        )
    ),
    tags(
        (name = "allocations", description = "Branch environment allocation"),
        (name = "webhooks", description = "Deployment platform callbacks"),
        (name = "environments", description = "Environment cache administration"),
        (name = "charts", description = "Deployable chart catalog"),
    ),
)]
pub struct ApiDoc;

/// Returns the generated `OpenAPI` spec.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Returns the generated `OpenAPI` spec serialized as pretty JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn openapi_json() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = openapi();
        for path in [
            "/api/v1/allocations",
            "/api/v1/webhooks/deployment",
            "/api/v1/environments",
            "/api/v1/environments/sync",
            "/api/v1/environments/{id}",
            "/api/v1/environments/{id}/services",
            "/api/v1/charts",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn spec_serializes() {
        let json = openapi_json().expect("serialize");
        assert!(json.contains("Sub-environment Allocator API"));
    }
}
