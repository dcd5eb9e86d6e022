//! HTTP route handlers.

pub mod allocations;
pub mod charts;
pub mod environments;
pub mod webhooks;

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

/// `/api/v1` routes.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(allocations::routes())
        .merge(webhooks::routes())
        .merge(environments::routes())
        .merge(charts::routes())
}
