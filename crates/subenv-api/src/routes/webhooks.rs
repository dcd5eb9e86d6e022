//! Deployment platform webhook routes.
//!
//! ## Routes
//!
//! - `POST /webhooks/deployment` - Workflow task finished
//!
//! Once the payload parses the handler always answers 200. Handling failures
//! are reported in the body.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use subenv_engine::{CallbackOutcome, DeploymentCallback};

use crate::context::RequestContext;
use crate::error::{ApiError, ApiErrorBody};
use crate::server::AppState;

/// Webhook acknowledgement.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct WebhookResponse {
    /// Always true once the payload parsed.
    pub acknowledged: bool,
    /// `notified` or `ignored`; absent when handling failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Notification recipient or reason the callback was ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Handling error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<CallbackOutcome> for WebhookResponse {
    fn from(outcome: CallbackOutcome) -> Self {
        let (result, detail) = match outcome {
            CallbackOutcome::Notified { target } => ("notified", target.to_string()),
            CallbackOutcome::Ignored { reason } => ("ignored", reason),
        };
        Self {
            acknowledged: true,
            result: Some(result.to_string()),
            detail: Some(detail),
            error: None,
        }
    }
}

/// Creates webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/deployment", post(deployment_callback))
}

/// Receive a finished-workflow callback from the deployment platform.
///
/// POST /api/v1/webhooks/deployment
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/deployment",
    tag = "webhooks",
    request_body(content = String, description = "Platform workflow webhook payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Callback acknowledged", body = WebhookResponse),
        (status = 400, description = "Payload did not parse", body = ApiErrorBody),
    )
)]
pub(crate) async fn deployment_callback(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let callback: DeploymentCallback = match serde_json::from_slice(&body) {
        Ok(callback) => callback,
        Err(e) => {
            crate::metrics::record_webhook_rejected();
            tracing::warn!(
                request_id = %ctx.request_id,
                error = %e,
                bytes = body.len(),
                "rejected webhook payload"
            );
            return Err(ctx.error(ApiError::bad_request(format!(
                "invalid webhook payload: {e}"
            ))));
        }
    };

    let handled = state.engine.correlator.on_callback(&callback).await;
    crate::metrics::record_webhook(handled.as_ref());
    let response = match handled {
        Ok(outcome) => WebhookResponse::from(outcome),
        Err(e) => {
            tracing::error!(
                request_id = %ctx.request_id,
                workflow = %callback.workflow.workflow_name,
                task_id = callback.workflow.task_id,
                error = %e,
                "webhook handling failed"
            );
            WebhookResponse {
                acknowledged: true,
                result: None,
                detail: None,
                error: Some(e.to_string()),
            }
        }
    };
    Ok(Json(response))
}
