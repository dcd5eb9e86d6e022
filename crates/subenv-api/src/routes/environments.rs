//! Environment cache administration routes.
//!
//! ## Routes
//!
//! - `GET    /environments` - List cached environment records
//! - `POST   /environments/sync` - Refresh the cache from the platform
//! - `GET    /environments/{id}` - Refresh, then read one record
//! - `DELETE /environments/{id}` - Forget a record the platform no longer lists
//! - `POST   /environments/{id}/services` - Add and deploy a service

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use subenv_core::{EnvironmentId, EnvironmentRecord};
use subenv_engine::{AllocationRequest, SyncReport};

use crate::context::RequestContext;
use crate::error::{ApiError, ApiErrorBody};
use crate::routes::allocations::TaskResponse;
use crate::server::AppState;

/// Cached environment record.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(Deserialize))]
pub struct EnvironmentResponse {
    /// Slot name (e.g. `test5`).
    pub id: String,
    /// Branch using the slot, or `in-tree`.
    pub owning_branch: String,
    /// Last actor that mutated the environment.
    pub last_updated_by: String,
    /// Deployed services, sorted.
    pub deployed_services: Vec<String>,
}

impl From<EnvironmentRecord> for EnvironmentResponse {
    fn from(record: EnvironmentRecord) -> Self {
        Self {
            id: record.id.to_string(),
            owning_branch: record.owning_branch,
            last_updated_by: record.last_updated_by,
            deployed_services: record.deployed_services.into_iter().collect(),
        }
    }
}

/// List environments response.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(Deserialize))]
pub struct ListEnvironmentsResponse {
    /// Records ordered by id.
    pub environments: Vec<EnvironmentResponse>,
}

/// One environment that failed to sync.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(Deserialize))]
pub struct SyncFailureResponse {
    /// Environment id.
    pub id: String,
    /// What went wrong.
    pub message: String,
}

/// Result of a cache refresh.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(Deserialize))]
pub struct SyncResponse {
    /// Environments written to the store.
    pub synced: Vec<String>,
    /// Reserved environments skipped.
    pub skipped: Vec<String>,
    /// Environments that failed.
    pub failures: Vec<SyncFailureResponse>,
    /// When the refresh finished.
    pub completed_at: DateTime<Utc>,
}

impl From<SyncReport> for SyncResponse {
    fn from(report: SyncReport) -> Self {
        Self {
            synced: report.synced.iter().map(ToString::to_string).collect(),
            skipped: report.skipped.iter().map(ToString::to_string).collect(),
            failures: report
                .failures
                .into_iter()
                .map(|f| SyncFailureResponse {
                    id: f.id.to_string(),
                    message: f.message,
                })
                .collect(),
            completed_at: Utc::now(),
        }
    }
}

/// Request to deploy a service into a known environment.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeployServiceRequest {
    /// Service to deploy.
    pub service: String,
    /// Branch the service is built from.
    pub branch: String,
    /// Identity of the requester.
    pub requester: String,
}

/// Deployment submitted into an environment.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(Deserialize))]
pub struct DeployServiceResponse {
    /// Environment id.
    pub environment: String,
    /// Deployment task.
    pub task: TaskResponse,
}

/// Creates environment routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/environments", get(list_environments))
        .route("/environments/sync", post(sync_environments))
        .route(
            "/environments/:id",
            get(get_environment).delete(forget_environment),
        )
        .route("/environments/:id/services", post(deploy_service))
}

/// List cached environment records.
///
/// GET /api/v1/environments
#[utoipa::path(
    get,
    path = "/api/v1/environments",
    tag = "environments",
    responses(
        (status = 200, description = "Records listed", body = ListEnvironmentsResponse),
        (status = 500, description = "Store unavailable", body = ApiErrorBody),
    )
)]
pub(crate) async fn list_environments(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::debug!(request_id = %ctx.request_id, "Listing environments");

    let mut records = state.engine.store.get_all().await.map_err(|e| ctx.error(e))?;
    records.sort_by(|a, b| a.id.cmp(&b.id));
    let environments = records.into_iter().map(EnvironmentResponse::from).collect();

    Ok(Json(ListEnvironmentsResponse { environments }))
}

/// Refresh the cache from the platform.
///
/// Individual environment failures are reported in the body and do not fail
/// the request.
///
/// POST /api/v1/environments/sync
#[utoipa::path(
    post,
    path = "/api/v1/environments/sync",
    tag = "environments",
    responses(
        (status = 200, description = "Cache refreshed", body = SyncResponse),
        (status = 502, description = "Platform listing failed", body = ApiErrorBody),
    )
)]
pub(crate) async fn sync_environments(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(request_id = %ctx.request_id, "Syncing environments");

    let report = state
        .engine
        .reconciler
        .sync()
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(SyncResponse::from(report)))
}

/// Refresh the cache, then read one environment.
///
/// GET /api/v1/environments/{id}
#[utoipa::path(
    get,
    path = "/api/v1/environments/{id}",
    tag = "environments",
    params(
        ("id" = String, Path, description = "Environment id")
    ),
    responses(
        (status = 200, description = "Record found", body = EnvironmentResponse),
        (status = 404, description = "No record", body = ApiErrorBody),
        (status = 502, description = "Platform listing failed", body = ApiErrorBody),
    )
)]
pub(crate) async fn get_environment(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = EnvironmentId::new(id);

    let report = state
        .engine
        .reconciler
        .sync()
        .await
        .map_err(|e| ctx.error(e))?;
    if let Some(failure) = report.failures.iter().find(|f| f.id == id) {
        tracing::warn!(
            request_id = %ctx.request_id,
            environment = %id,
            error = %failure.message,
            "environment did not sync, serving cached record"
        );
    }

    let record = state
        .engine
        .store
        .get(&id)
        .await
        .map_err(|e| ctx.error(e))?
        .ok_or_else(|| ctx.error(ApiError::not_found(format!("environment {id} not found"))))?;

    Ok(Json(EnvironmentResponse::from(record)))
}

/// Forget an environment the platform no longer lists.
///
/// DELETE /api/v1/environments/{id}
#[utoipa::path(
    delete,
    path = "/api/v1/environments/{id}",
    tag = "environments",
    params(
        ("id" = String, Path, description = "Environment id")
    ),
    responses(
        (status = 204, description = "Record removed"),
        (status = 404, description = "No record", body = ApiErrorBody),
        (status = 409, description = "Platform still lists the environment", body = ApiErrorBody),
    )
)]
pub(crate) async fn forget_environment(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = EnvironmentId::new(id);
    tracing::info!(request_id = %ctx.request_id, environment = %id, "Forgetting environment");

    state
        .engine
        .reconciler
        .forget(&id)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add a service to a known environment and deploy it.
///
/// The owning branch is left unchanged.
///
/// POST /api/v1/environments/{id}/services
#[utoipa::path(
    post,
    path = "/api/v1/environments/{id}/services",
    tag = "environments",
    params(
        ("id" = String, Path, description = "Environment id")
    ),
    request_body = DeployServiceRequest,
    responses(
        (status = 202, description = "Deployment submitted", body = DeployServiceResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 404, description = "Unknown environment or service", body = ApiErrorBody),
        (status = 502, description = "Platform call failed", body = ApiErrorBody),
    )
)]
pub(crate) async fn deploy_service(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<DeployServiceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.service.trim().is_empty() {
        return Err(ctx.error(ApiError::bad_request("service must not be empty")));
    }

    let id = EnvironmentId::new(id);
    tracing::info!(
        request_id = %ctx.request_id,
        environment = %id,
        service = %req.service,
        branch = %req.branch,
        "Deploying service into environment"
    );

    let request = AllocationRequest {
        branch: req.branch,
        service: req.service,
        requester: req.requester,
    };
    let task = state
        .engine
        .allocator
        .deploy_to(&id, &request)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DeployServiceResponse {
            environment: id.to_string(),
            task: task.into(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use subenv_engine::reconcile::SyncFailure;

    #[test]
    fn record_services_are_sorted() {
        let record = EnvironmentRecord::new(
            "test4".into(),
            "feature/ABC-1",
            "dev@example.com",
            ["zeta", "alpha"],
        );
        let response = EnvironmentResponse::from(record);
        assert_eq!(response.deployed_services, vec!["alpha", "zeta"]);
    }

    #[test]
    fn sync_report_keeps_failures() {
        let report = SyncReport {
            synced: vec!["test1".into()],
            skipped: vec!["test17".into()],
            failures: vec![SyncFailure {
                id: "test2".into(),
                message: "detail fetch failed".to_string(),
            }],
        };
        let response = SyncResponse::from(report);
        assert_eq!(response.synced, vec!["test1"]);
        assert_eq!(response.skipped, vec!["test17"]);
        assert_eq!(response.failures.len(), 1);
        assert_eq!(response.failures[0].id, "test2");
    }
}
