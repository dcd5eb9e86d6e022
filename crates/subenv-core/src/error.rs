//! Error types and result aliases for the allocator.
//!
//! Errors are structured for programmatic handling: the HTTP layer maps each
//! variant to a status code, and the engine decides per variant whether a
//! failure aborts an operation or is logged and skipped.

use std::time::Duration;

/// The result type used throughout the allocator.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in allocation, reconciliation and correlation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The branch name matches neither a stable branch nor a feature prefix.
    #[error("unrecognized branch: {branch}")]
    UnrecognizedBranch {
        /// The branch name as received.
        branch: String,
    },

    /// The requested service is absent from the platform's chart catalog
    /// (or has no build target in the service-name table).
    #[error("service not found: {service}")]
    ServiceNotFound {
        /// The requested service name.
        service: String,
    },

    /// Every slot of the pool is in use on the remote platform.
    #[error("no free environment in a pool of {pool_size}")]
    PoolExhausted {
        /// Total number of allocatable slots.
        pool_size: usize,
    },

    /// The environment did not report ready before the deadline.
    #[error("environment {environment} not ready after {waited:?}")]
    Timeout {
        /// Environment being waited on.
        environment: String,
        /// How long the wait lasted.
        waited: Duration,
    },

    /// The remote platform reported a terminal failure for the environment.
    #[error("environment {environment} failed with status {status}")]
    EnvironmentFailed {
        /// Environment that failed.
        environment: String,
        /// Raw status reported by the platform.
        status: String,
    },

    /// The operation was cancelled by the caller or by shutdown.
    #[error("cancelled: {message}")]
    Cancelled {
        /// What was being done when the cancellation arrived.
        message: String,
    },

    /// The remote platform rejected or failed a deployment task submission.
    #[error("deployment submission failed: {message}")]
    Submission {
        /// Description of the failure.
        message: String,
    },

    /// A mapping store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A call to the remote platform or chat service failed.
    #[error("remote call failed: {message}")]
    RemoteCall {
        /// Description of the failure.
        message: String,
        /// HTTP status, when the remote answered at all.
        status: Option<u16>,
    },

    /// A record or remote resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A precondition for the operation was not met.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a remote call error without an HTTP status (transport failure).
    #[must_use]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteCall {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a remote call error for a non-success HTTP status.
    #[must_use]
    pub fn remote_status(status: u16, message: impl Into<String>) -> Self {
        Self::RemoteCall {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Creates a deployment submission error.
    #[must_use]
    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission {
            message: message.into(),
        }
    }

    /// Returns true for errors a caller should surface as their own mistake
    /// rather than a system failure.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnrecognizedBranch { .. } | Self::ServiceNotFound { .. } | Self::InvalidInput(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            message: value.to_string(),
        }
    }
}
