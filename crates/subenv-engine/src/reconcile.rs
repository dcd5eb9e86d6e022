//! Reconciliation of the mapping store against the remote catalog.
//!
//! The remote platform decides which environments exist and what runs in
//! them; the store decides which branch uses each one. `sync` copies the
//! former into the store without touching the latter. It is best-effort:
//! one environment failing to sync never blocks the others.

use std::sync::Arc;

use serde::Serialize;
use subenv_core::{EnvironmentId, EnvironmentRecord, Error, MappingStore, Result};

use crate::metrics::EngineMetrics;
use crate::platform::Platform;
use crate::settings::EngineSettings;

/// An environment that failed to sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    /// Environment id.
    pub id: EnvironmentId,
    /// What went wrong.
    pub message: String,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Environments written to the store.
    pub synced: Vec<EnvironmentId>,
    /// Reserved environments skipped.
    pub skipped: Vec<EnvironmentId>,
    /// Environments that failed.
    pub failures: Vec<SyncFailure>,
}

/// Copies remote environment state into the mapping store.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn MappingStore>,
    platform: Arc<dyn Platform>,
    settings: Arc<EngineSettings>,
    metrics: EngineMetrics,
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        store: Arc<dyn MappingStore>,
        platform: Arc<dyn Platform>,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            store,
            platform,
            settings,
            metrics: EngineMetrics::new(),
        }
    }

    /// Refreshes every non-reserved environment's record.
    ///
    /// Records keep their owning branch; environments the store has never
    /// seen are recorded as [`subenv_core::IN_TREE`].
    ///
    /// # Errors
    ///
    /// Fails only if the environment list itself cannot be fetched.
    /// Per-environment failures are logged and reported in the
    /// [`SyncReport`].
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self) -> Result<SyncReport> {
        let remote = self.platform.list_environments().await?;
        let mut report = SyncReport::default();

        for env in remote {
            let id = env.id();
            if self.settings.pool.is_reserved(id.as_str()) {
                report.skipped.push(id);
                continue;
            }
            match self.sync_one(&id).await {
                Ok(()) => {
                    self.metrics.record_sync("success");
                    report.synced.push(id);
                }
                Err(err) => {
                    tracing::warn!(environment = %id, error = %err, "failed to sync environment");
                    self.metrics.record_sync("failure");
                    report.failures.push(SyncFailure {
                        id,
                        message: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            synced = report.synced.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "environment sync finished"
        );
        Ok(report)
    }

    async fn sync_one(&self, id: &EnvironmentId) -> Result<()> {
        let detail = self.platform.environment_detail(id).await?;
        let record = match self.store.get(id).await? {
            Some(existing) => EnvironmentRecord::new(
                id.clone(),
                existing.owning_branch,
                detail.update_by,
                detail.services,
            ),
            None => EnvironmentRecord::in_tree(id.clone(), detail.update_by, detail.services),
        };
        self.store.save(&record).await
    }

    /// Drops the record for an environment the platform no longer has.
    ///
    /// # Errors
    ///
    /// Returns `Error::PreconditionFailed` if the platform still reports the
    /// environment and `Error::NotFound` if no record exists.
    pub async fn forget(&self, id: &EnvironmentId) -> Result<()> {
        let remote = self.platform.list_environments().await?;
        if remote.iter().any(|env| env.env_key == id.as_str()) {
            return Err(Error::PreconditionFailed {
                message: format!("environment {id} still exists on the platform"),
            });
        }
        self.store.delete(id).await?;
        tracing::info!(environment = %id, "forgot environment record");
        Ok(())
    }
}
