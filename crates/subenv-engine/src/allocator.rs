//! Branch to environment allocation.
//!
//! A feature branch reuses the environment it already owns, or gets a fresh
//! one from the pool. Stable branches are left alone. Either way the
//! requested service ends up deployed and the caller receives the task
//! handle; completion is reported later through the webhook.
//!
//! ## Provisioning
//!
//! 1. pick a free slot (remote catalog decides what is used)
//! 2. create it from the environment template
//! 3. wait until the platform reports it ready
//! 4. deploy the bootstrap service; failure here aborts before any record is written
//! 5. record the slot as owned by the branch
//! 6. deploy the requested service

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use subenv_core::observability::allocation_span;
use subenv_core::{
    BranchKind, EnvironmentId, EnvironmentRecord, Error, MappingStore, Result,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::correlator::Correlator;
use crate::locks::BranchLocks;
use crate::metrics::EngineMetrics;
use crate::platform::{ChartCatalog, CreateEnvironment, Platform, TaskRef};
use crate::readiness::wait_until_ready;
use crate::reconcile::Reconciler;
use crate::settings::EngineSettings;

/// An allocation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// Branch the service is built from.
    pub branch: String,
    /// Service to deploy.
    pub service: String,
    /// Identity of the requester, usually an email.
    pub requester: String,
}

/// Result of an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AllocationOutcome {
    /// Stable branch: nothing was touched.
    Skipped {
        /// The branch.
        branch: String,
    },
    /// The branch's existing environment was used.
    Reused {
        /// Environment id.
        environment: EnvironmentId,
        /// Deployment task.
        task: TaskRef,
    },
    /// A new environment was provisioned.
    Provisioned {
        /// Environment id.
        environment: EnvironmentId,
        /// Deployment task.
        task: TaskRef,
    },
}

impl AllocationOutcome {
    /// Metric label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Reused { .. } => "reused",
            Self::Provisioned { .. } => "provisioned",
        }
    }

    /// Environment the service was deployed to, if any.
    #[must_use]
    pub fn environment(&self) -> Option<&EnvironmentId> {
        match self {
            Self::Skipped { .. } => None,
            Self::Reused { environment, .. } | Self::Provisioned { environment, .. } => {
                Some(environment)
            }
        }
    }
}

/// Allocates environments to branches and deploys services into them.
#[derive(Clone)]
pub struct Allocator {
    store: Arc<dyn MappingStore>,
    platform: Arc<dyn Platform>,
    reconciler: Reconciler,
    correlator: Correlator,
    settings: Arc<EngineSettings>,
    locks: BranchLocks,
    metrics: EngineMetrics,
}

impl Allocator {
    /// Creates an allocator.
    #[must_use]
    pub fn new(
        store: Arc<dyn MappingStore>,
        platform: Arc<dyn Platform>,
        reconciler: Reconciler,
        correlator: Correlator,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            store,
            platform,
            reconciler,
            correlator,
            settings,
            locks: BranchLocks::new(),
            metrics: EngineMetrics::new(),
        }
    }

    /// Allocates an environment for `request.branch` and deploys
    /// `request.service` into it.
    ///
    /// # Errors
    ///
    /// - `Error::UnrecognizedBranch` for branches that are neither stable nor
    ///   feature branches
    /// - `Error::ServiceNotFound` if the service is not deployable
    /// - `Error::PoolExhausted` when no slot is free
    /// - `Error::Timeout`, `Error::EnvironmentFailed` or `Error::Cancelled`
    ///   from the readiness wait
    /// - `Error::Submission` if a deployment cannot be submitted
    pub async fn allocate(
        &self,
        request: &AllocationRequest,
        cancel: &CancellationToken,
    ) -> Result<AllocationOutcome> {
        let span = allocation_span(&request.branch, &request.service, &request.requester);
        let started = Instant::now();
        let result = self
            .allocate_inner(request, cancel)
            .instrument(span.clone())
            .await;

        match &result {
            Ok(outcome) => {
                if let Some(env) = outcome.environment() {
                    span.record("environment", env.as_str());
                }
                self.metrics
                    .record_allocation(outcome.label(), started.elapsed());
            }
            Err(err) => {
                span.in_scope(|| tracing::warn!(error = %err, "allocation failed"));
                self.metrics.record_allocation("error", started.elapsed());
            }
        }
        result
    }

    async fn allocate_inner(
        &self,
        request: &AllocationRequest,
        cancel: &CancellationToken,
    ) -> Result<AllocationOutcome> {
        match self.settings.branch_policy.classify(&request.branch)? {
            BranchKind::Stable => {
                tracing::info!("stable branch, no sub-environment needed");
                Ok(AllocationOutcome::Skipped {
                    branch: request.branch.clone(),
                })
            }
            BranchKind::Feature => self.allocate_feature(request, cancel).await,
        }
    }

    async fn allocate_feature(
        &self,
        request: &AllocationRequest,
        cancel: &CancellationToken,
    ) -> Result<AllocationOutcome> {
        let _guard = self.locks.lock(&request.branch).await;

        if let Some(record) = self.store.find_by_branch(&request.branch).await? {
            let environment = record.id.clone();
            let task = self.deploy_into(record, request, None).await?;
            return Ok(AllocationOutcome::Reused { environment, task });
        }

        // The store may be stale after a restart or a manual change.
        if let Err(err) = self.reconciler.sync().await {
            tracing::warn!(error = %err, "sync before provisioning failed, continuing");
        }
        if let Some(record) = self.store.find_by_branch(&request.branch).await? {
            let environment = record.id.clone();
            let task = self.deploy_into(record, request, None).await?;
            return Ok(AllocationOutcome::Reused { environment, task });
        }

        let (record, catalog) = self.provision(request, cancel).await?;
        let environment = record.id.clone();
        let task = self.deploy_into(record, request, Some(&catalog)).await?;
        Ok(AllocationOutcome::Provisioned { environment, task })
    }

    async fn provision(
        &self,
        request: &AllocationRequest,
        cancel: &CancellationToken,
    ) -> Result<(EnvironmentRecord, ChartCatalog)> {
        let catalog = self.platform.chart_catalog().await?;
        if !catalog.contains(&request.service) {
            return Err(Error::ServiceNotFound {
                service: request.service.clone(),
            });
        }
        // Fail before consuming a slot if the service cannot be built.
        self.correlator
            .check_buildable(&request.service, &request.branch)?;

        let remote = self.platform.list_environments().await?;
        let used: Vec<&str> = remote.iter().map(|e| e.env_key.as_str()).collect();
        self.metrics
            .set_free_slots(self.settings.pool.available(used.iter().copied()).len());
        let id = self.settings.pool.choose(used)?;
        tracing::info!(environment = %id, "provisioning environment");

        let template = &self.settings.environment;
        let charts = template
            .charts
            .iter()
            .filter_map(|name| {
                let chart = catalog.get(name);
                if chart.is_none() {
                    tracing::warn!(chart = %name, "template chart missing from catalog, skipped");
                }
                chart
            })
            .collect();
        self.platform
            .create_environment(&CreateEnvironment {
                id: id.clone(),
                charts,
                cluster_id: template.cluster_id.clone(),
                registry_id: template.registry_id.clone(),
                base_environment: template.base_environment.clone(),
            })
            .await?;

        wait_until_ready(self.platform.as_ref(), &id, self.settings.readiness, cancel).await?;

        let bootstrap = &self.settings.bootstrap;
        self.correlator
            .submit_deployment(
                &id,
                &bootstrap.service,
                &bootstrap.branch_for(&request.branch),
                &request.requester,
            )
            .await?;

        let record = EnvironmentRecord::new(
            id,
            request.branch.clone(),
            request.requester.clone(),
            bootstrap.recorded_services.iter().cloned(),
        );
        self.store.save(&record).await?;
        Ok((record, catalog))
    }

    /// Deploys `service` from `branch` into an environment that already has a
    /// record, without changing its owner.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no record exists for `id`, plus the errors
    /// of the deployment itself.
    pub async fn deploy_to(
        &self,
        id: &EnvironmentId,
        request: &AllocationRequest,
    ) -> Result<TaskRef> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("environment record {id}")))?;
        self.deploy_into(record, request, None).await
    }

    async fn deploy_into(
        &self,
        mut record: EnvironmentRecord,
        request: &AllocationRequest,
        catalog: Option<&ChartCatalog>,
    ) -> Result<TaskRef> {
        if !record.has_service(&request.service) {
            let fetched;
            let catalog = if let Some(c) = catalog {
                c
            } else {
                fetched = self.platform.chart_catalog().await?;
                &fetched
            };
            let chart = catalog
                .get(&request.service)
                .ok_or_else(|| Error::ServiceNotFound {
                    service: request.service.clone(),
                })?;
            self.platform.add_service(&record.id, &chart).await?;
            record.add_service(request.service.clone());
        }

        record.last_updated_by.clone_from(&request.requester);
        self.store.save(&record).await?;

        self.correlator
            .submit_deployment(
                &record.id,
                &request.service,
                &request.branch,
                &request.requester,
            )
            .await
    }
}
