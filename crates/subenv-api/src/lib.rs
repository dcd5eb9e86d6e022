//! # subenv-api
//!
//! HTTP composition layer for the sub-environment allocator.
//!
//! This crate provides the API surface, handling:
//!
//! - **Routing**: allocation, webhook and cache administration endpoints
//! - **Service Wiring**: reqwest clients for the deployment platform and the
//!   chat service, plugged into `subenv-engine`
//! - **Observability**: metrics, tracing, and health checks
//!
//! ## Design Principles
//!
//! This crate is a **thin composition layer** with no domain policy.
//! All allocation logic lives in `subenv-engine`.
//!
//! ## Endpoints
//!
//! ```text
//! HTTP:
//!   GET    /health                             - Health check
//!   GET    /ready                              - Readiness check
//!   GET    /metrics                            - Prometheus metrics
//!   POST   /api/v1/allocations                 - Allocate and deploy
//!   POST   /api/v1/webhooks/deployment         - Platform workflow callbacks
//!   GET    /api/v1/environments                - Cached records
//!   POST   /api/v1/environments/sync           - Refresh the cache
//!   GET    /api/v1/environments/{id}           - Refresh, then read one
//!   DELETE /api/v1/environments/{id}           - Forget a vanished record
//!   POST   /api/v1/environments/{id}/services  - Deploy into an environment
//!   GET    /api/v1/charts                      - Chart catalog
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use subenv_api::server::Server;
//!
//! let server = Server::builder(engine)
//!     .http_port(6652)
//!     .build();
//!
//! server.serve().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod chat_client;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod openapi;
pub mod platform_client;
pub mod routes;
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::chat_client::ChatNotifier;
    pub use crate::config::Config;
    pub use crate::context::RequestContext;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::platform_client::PlatformClient;
    pub use crate::server::Server;
}
