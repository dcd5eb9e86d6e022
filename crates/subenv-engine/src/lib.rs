//! # subenv-engine
//!
//! Allocation engine for shared test sub-environments.
//!
//! - **Allocator**: branch to environment mapping, provisioning and deployment
//! - **Reconciler**: refreshes the mapping store from the remote catalog
//! - **Correlator**: submits deployment tasks and turns webhook callbacks
//!   into chat notifications
//!
//! The remote platform and the chat service sit behind the [`Platform`] and
//! [`Notifier`] traits so the engine can be driven against fakes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use subenv_core::{MemoryMappingStore, ServiceNameTable};
//! use subenv_engine::{AllocationRequest, Engine, EngineSettings, LogNotifier, Platform};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(platform: Arc<dyn Platform>) -> subenv_core::Result<()> {
//! let engine = Engine::new(
//!     Arc::new(MemoryMappingStore::new()),
//!     platform,
//!     Arc::new(LogNotifier),
//!     ServiceNameTable::builtin()?,
//!     EngineSettings::default(),
//! );
//! let request = AllocationRequest {
//!     branch: "feature/ABC-1".into(),
//!     service: "payment-api".into(),
//!     requester: "dev@example.com".into(),
//! };
//! let outcome = engine.allocator.allocate(&request, &CancellationToken::new()).await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod allocator;
pub mod correlator;
pub mod locks;
pub mod metrics;
pub mod notify;
pub mod platform;
pub mod readiness;
pub mod reconcile;
pub mod settings;

use std::sync::Arc;

use subenv_core::{MappingStore, ServiceNameTable};

pub use allocator::{AllocationOutcome, AllocationRequest, Allocator};
pub use correlator::{CallbackOutcome, Correlator, DeploymentCallback, WorkflowKind};
pub use notify::{LogNotifier, Notification, Notifier, NotifyTarget};
pub use platform::{ChartCatalog, Platform, TaskRef};
pub use reconcile::{Reconciler, SyncReport};
pub use settings::EngineSettings;

/// The engine's components, wired together.
#[derive(Clone)]
pub struct Engine {
    /// Allocation entry point.
    pub allocator: Allocator,
    /// Store reconciliation.
    pub reconciler: Reconciler,
    /// Deployment submission and webhook handling.
    pub correlator: Correlator,
    /// The mapping store.
    pub store: Arc<dyn MappingStore>,
    /// The remote platform.
    pub platform: Arc<dyn Platform>,
    /// Settings shared by every component.
    pub settings: Arc<EngineSettings>,
}

impl Engine {
    /// Wires the engine components.
    #[must_use]
    pub fn new(
        store: Arc<dyn MappingStore>,
        platform: Arc<dyn Platform>,
        notifier: Arc<dyn Notifier>,
        service_names: ServiceNameTable,
        settings: EngineSettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            Arc::clone(&settings),
        );
        let correlator = Correlator::new(
            Arc::clone(&platform),
            notifier,
            Arc::new(service_names),
            Arc::clone(&settings),
        );
        let allocator = Allocator::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            reconciler.clone(),
            correlator.clone(),
            Arc::clone(&settings),
        );
        Self {
            allocator,
            reconciler,
            correlator,
            store,
            platform,
            settings,
        }
    }
}
