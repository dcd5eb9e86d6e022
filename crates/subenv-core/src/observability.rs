//! Observability helpers for the allocator.
//!
//! Structured logging with consistent spans. Every allocation and every
//! webhook callback runs inside a span carrying its identifying fields.

use std::fmt;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_subscriber::{
    EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `subenv_engine=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for one allocation request.
///
/// # Example
///
/// ```rust
/// use subenv_core::observability::allocation_span;
///
/// let span = allocation_span("feature/ABC-1", "payment-api", "alice@example.com");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn allocation_span(branch: &str, service: &str, requester: &str) -> Span {
    tracing::info_span!(
        "allocation",
        branch = branch,
        service = service,
        requester = requester,
        environment = tracing::field::Empty,
    )
}

/// Creates a span for one deployment webhook callback.
#[must_use]
pub fn callback_span(workflow: &str, task_id: u64) -> Span {
    tracing::info_span!("deployment_callback", workflow = workflow, task_id = task_id)
}

/// Wrapper that hides a secret in `Debug` and `Display` output.
///
/// Serializes transparently so configuration round-trips.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Redacted<T>(pub T);

impl<T> Redacted<T> {
    /// Returns the wrapped value.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn test_allocation_span_records_environment() {
        let span = allocation_span("feature/x", "svc", "dev@example.com");
        span.record("environment", "test4");
        let _guard = span.enter();
        tracing::info!("allocation message");
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn redacted_hides_value() {
        let secret = Redacted("hunter2".to_string());
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(secret.expose(), "hunter2");
    }
}
