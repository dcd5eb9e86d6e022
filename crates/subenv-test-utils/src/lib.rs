//! Shared test utilities for the sub-environment allocator.
//!
//! This crate provides:
//! - [`FakePlatform`]: in-memory deployment platform with operation recording
//!   and failure injection
//! - [`TracingMappingStore`]: memory store that records every access
//! - [`RecordingNotifier`]: notifier that keeps what it was asked to send
//! - [`TestContext`]: all of the above wired into an engine
//!
//! # Example
//!
//! ```rust,ignore
//! use subenv_test_utils::{TestContext, request};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new();
//!     let outcome = ctx.engine.allocator
//!         .allocate(&request("feature/ABC-1", "payment-api"), &Default::default())
//!         .await;
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod notifier;
pub mod platform;
pub mod store;

pub use fixtures::*;
pub use notifier::*;
pub use platform::*;
pub use store::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("subenv=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
