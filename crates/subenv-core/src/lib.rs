//! # subenv-core
//!
//! Shared primitives for the sub-environment allocator.
//!
//! - **Records**: the cached state of one environment slot
//! - **Mapping store**: persistence contract with memory and Redis backends
//! - **Branch policy**: which branches get a sub-environment
//! - **Slot pool**: the fixed set of allocatable environment names
//! - **Service name table**: requested service to build target lookup
//! - **Error types**: shared error definitions and result types
//!
//! ## Example
//!
//! ```rust
//! use subenv_core::prelude::*;
//!
//! let policy = BranchPolicy::default();
//! assert_eq!(policy.classify("feature/ABC-1").ok(), Some(BranchKind::Feature));
//!
//! let pool = SlotPool::default();
//! assert!(!pool.slots().is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod branch;
pub mod error;
pub mod observability;
pub mod pool;
pub mod record;
pub mod redis_store;
pub mod service_names;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::branch::{BranchKind, BranchPolicy};
    pub use crate::error::{Error, Result};
    pub use crate::pool::SlotPool;
    pub use crate::record::{EnvironmentId, EnvironmentRecord, IN_TREE};
    pub use crate::service_names::{BuildTarget, ServiceNameTable};
    pub use crate::store::{MappingStore, MemoryMappingStore};
}

pub use branch::{BranchKind, BranchPolicy};
pub use error::{Error, Result};
pub use observability::{LogFormat, Redacted, init_logging};
pub use pool::SlotPool;
pub use record::{EnvironmentId, EnvironmentRecord, IN_TREE};
pub use redis_store::RedisMappingStore;
pub use service_names::{BuildTarget, ServiceNameTable};
pub use store::{MappingStore, MemoryMappingStore};
