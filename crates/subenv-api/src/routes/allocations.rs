//! Allocation API routes.
//!
//! ## Routes
//!
//! - `POST /allocations` - Deploy a service for a branch, provisioning an
//!   environment when the branch has none

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use subenv_engine::{AllocationOutcome, AllocationRequest, TaskRef};

use crate::context::RequestContext;
use crate::error::{ApiError, ApiErrorBody};
use crate::server::AppState;

/// Request to deploy a service for a branch.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AllocationRequestBody {
    /// Branch the service is built from (e.g. `feature/ABC-123`).
    pub branch: String,
    /// Service to deploy.
    pub service: String,
    /// Identity of the requester, usually an email.
    pub requester: String,
}

/// Handle to a submitted deployment task.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(Deserialize))]
pub struct TaskResponse {
    /// Project the task runs in.
    pub project_name: String,
    /// Workflow key.
    pub workflow_name: String,
    /// Task number.
    pub task_id: u64,
}

impl From<TaskRef> for TaskResponse {
    fn from(task: TaskRef) -> Self {
        Self {
            project_name: task.project_name,
            workflow_name: task.workflow_name,
            task_id: task.task_id,
        }
    }
}

/// Allocation result.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(Deserialize))]
pub struct AllocationResponse {
    /// `skipped`, `reused` or `provisioned`.
    pub outcome: String,
    /// Branch the request was for.
    pub branch: String,
    /// Environment the service was deployed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Deployment task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskResponse>,
}

impl AllocationResponse {
    fn new(branch: String, outcome: AllocationOutcome) -> Self {
        let label = outcome.label().to_string();
        let (environment, task) = match outcome {
            AllocationOutcome::Skipped { .. } => (None, None),
            AllocationOutcome::Reused { environment, task }
            | AllocationOutcome::Provisioned { environment, task } => {
                (Some(environment.to_string()), Some(task.into()))
            }
        };
        Self {
            outcome: label,
            branch,
            environment,
            task,
        }
    }
}

/// Creates allocation routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/allocations", post(allocate))
}

/// Allocate an environment for a branch and deploy a service into it.
///
/// Stable branches (exactly `main`, `master`, `release`, `dev` or `develop`) are
/// skipped with 200.
/// A new environment is returned with 201 once it reported ready.
///
/// POST /api/v1/allocations
#[utoipa::path(
    post,
    path = "/api/v1/allocations",
    tag = "allocations",
    request_body = AllocationRequestBody,
    responses(
        (status = 200, description = "Skipped or reused", body = AllocationResponse),
        (status = 201, description = "Environment provisioned", body = AllocationResponse),
        (status = 400, description = "Unrecognized branch", body = ApiErrorBody),
        (status = 404, description = "Unknown service", body = ApiErrorBody),
        (status = 502, description = "Platform call failed", body = ApiErrorBody),
        (status = 503, description = "Pool exhausted", body = ApiErrorBody),
        (status = 504, description = "Environment not ready in time", body = ApiErrorBody),
    )
)]
pub(crate) async fn allocate(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AllocationRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    if req.branch.trim().is_empty() || req.service.trim().is_empty() {
        return Err(ctx.error(ApiError::bad_request(
            "branch and service must not be empty",
        )));
    }

    tracing::info!(
        request_id = %ctx.request_id,
        branch = %req.branch,
        service = %req.service,
        requester = %req.requester,
        "Allocating environment"
    );

    let request = AllocationRequest {
        branch: req.branch,
        service: req.service,
        requester: req.requester,
    };
    let outcome = state
        .engine
        .allocator
        .allocate(&request, &ctx.cancel)
        .await
        .map_err(|e| ctx.error(e))?;

    let status = match outcome {
        AllocationOutcome::Provisioned { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(AllocationResponse::new(request.branch, outcome))))
}
