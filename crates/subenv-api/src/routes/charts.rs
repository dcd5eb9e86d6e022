//! Chart catalog routes.
//!
//! ## Routes
//!
//! - `GET /charts` - Deployable services and their chart versions

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use subenv_engine::ChartCatalog;

use crate::context::RequestContext;
use crate::error::{ApiError, ApiErrorBody};
use crate::server::AppState;

/// A deployable chart.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ChartResponse {
    /// Service (chart) name.
    pub service_name: String,
    /// Current chart version.
    pub chart_version: String,
}

/// Chart catalog response.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ListChartsResponse {
    /// Charts ordered by service name.
    pub charts: Vec<ChartResponse>,
}

impl From<&ChartCatalog> for ListChartsResponse {
    fn from(catalog: &ChartCatalog) -> Self {
        Self {
            charts: catalog
                .iter()
                .map(|c| ChartResponse {
                    service_name: c.service_name,
                    chart_version: c.chart_version,
                })
                .collect(),
        }
    }
}

/// Creates chart routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/charts", get(list_charts))
}

/// List deployable charts.
///
/// GET /api/v1/charts
#[utoipa::path(
    get,
    path = "/api/v1/charts",
    tag = "charts",
    responses(
        (status = 200, description = "Catalog listed", body = ListChartsResponse),
        (status = 502, description = "Platform call failed", body = ApiErrorBody),
    )
)]
pub(crate) async fn list_charts(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = state
        .engine
        .platform
        .chart_catalog()
        .await
        .map_err(|e| ctx.error(e))?;
    tracing::debug!(request_id = %ctx.request_id, charts = catalog.len(), "Listed charts");

    Ok(Json(ListChartsResponse::from(&catalog)))
}
