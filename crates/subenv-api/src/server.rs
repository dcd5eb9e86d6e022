//! API server implementation.
//!
//! Provides health, ready, metrics and the `/api/v1` allocator endpoints.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use subenv_core::{Error, Result};
use subenv_engine::Engine;

use crate::config::Config;

// ============================================================================
// Health and Ready Responses
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Allocation engine.
    pub engine: Engine,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("engine", &"<Engine>")
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint handler.
///
/// Returns 200 OK if the process is alive. Dependencies are not checked.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check endpoint handler.
///
/// Returns 200 OK once the mapping store answers a ping.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.shutdown.is_cancelled() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some("shutting down".to_string()),
            }),
        );
    }

    match state.engine.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some(format!("mapping store check failed: {e}")),
            }),
        ),
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

// ============================================================================
// Server
// ============================================================================

/// The sub-environment allocator API server.
pub struct Server {
    config: Config,
    engine: Engine,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("engine", &"<Engine>")
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a new server around a wired engine.
    #[must_use]
    pub fn new(config: Config, engine: Engine) -> Self {
        Self {
            config,
            engine,
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates a new `ServerBuilder`.
    #[must_use]
    pub fn builder(engine: Engine) -> ServerBuilder {
        ServerBuilder::new(engine)
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that stops the server when cancelled.
    ///
    /// In-flight allocations observe it through their request context and
    /// stop waiting on readiness.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Creates the router with all routes and middleware.
    fn create_router(&self) -> Router {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            engine: self.engine.clone(),
            shutdown: self.shutdown.clone(),
        });

        let context_layer = middleware::from_fn_with_state(
            Arc::clone(&state),
            crate::context::request_context_middleware,
        );
        let metrics_layer = middleware::from_fn(crate::metrics::metrics_middleware);

        Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(crate::metrics::serve_metrics))
            .nest("/api/v1", crate::routes::api_v1_routes().layer(context_layer))
            // Metrics outermost so timing covers tracing.
            .layer(TraceLayer::new_for_http())
            .layer(metrics_layer)
            .with_state(state)
    }

    /// Starts the server and blocks until shutdown.
    ///
    /// Shutdown starts on Ctrl+C, SIGTERM or cancellation of
    /// [`Server::shutdown_token`]. In-flight requests get
    /// `shutdown_timeout_secs` to drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the server cannot
    /// bind to the port.
    pub async fn serve(&self) -> Result<()> {
        self.validate_config()?;

        crate::metrics::init_metrics()?;

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.create_router();

        tracing::info!(
            http_port = self.config.http_port,
            pool_size = self.engine.settings.pool.size,
            "Starting sub-environment allocator API"
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal {
                message: format!("failed to bind to {addr}: {e}"),
            })?;

        let shutdown = self.shutdown.clone();
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown_signal() => shutdown.cancel(),
                () = shutdown.cancelled() => {},
            }
        });

        let drain = Duration::from_secs(self.config.shutdown_timeout_secs);
        let shutdown = self.shutdown.clone();
        let mut server = std::pin::pin!(server.into_future());
        let finished = tokio::select! {
            result = &mut server => Some(result),
            () = shutdown.cancelled() => None,
        };
        if let Some(result) = finished {
            return result.map_err(|e| Error::Internal {
                message: format!("server error: {e}"),
            });
        }

        match tokio::time::timeout(drain, server).await {
            Ok(result) => result.map_err(|e| Error::Internal {
                message: format!("server error: {e}"),
            }),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.shutdown_timeout_secs,
                    "in-flight requests did not drain before the shutdown timeout"
                );
                Ok(())
            }
        }
    }

    /// Creates a test router for the server.
    ///
    /// Useful for integration tests that exercise routes without binding a
    /// port.
    #[doc(hidden)]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }

    fn validate_config(&self) -> Result<()> {
        self.config.validate()?;

        if !self.config.debug && self.config.redis_url.is_none() {
            return Err(Error::InvalidInput(
                "redis_url is required when debug=false".to_string(),
            ));
        }

        if !self.config.debug
            && (self.config.platform.base_url.is_none() || self.config.platform.api_token.is_none())
        {
            return Err(Error::InvalidInput(
                "platform.base_url and platform.api_token are required when debug=false"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for constructing a server.
pub struct ServerBuilder {
    config: Config,
    engine: Engine,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("engine", &"<Engine>")
            .finish()
    }
}

impl ServerBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            config: Config::default(),
            engine,
        }
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the HTTP port.
    #[must_use]
    pub fn http_port(mut self, port: u16) -> Self {
        self.config.http_port = port;
        self
    }

    /// Enables debug mode.
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        Server::new(self.config, self.engine)
    }
}

// ============================================================================
// Tests
// ============================================================================
