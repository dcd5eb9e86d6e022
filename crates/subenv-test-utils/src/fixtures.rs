//! Pre-built test fixtures for common test scenarios.

use std::sync::Arc;
use std::time::Duration;

use subenv_core::{EnvironmentRecord, ServiceNameTable, SlotPool};
use subenv_engine::correlator::{CallbackJob, CallbackStage, DeploymentCallback, WorkflowEvent};
use subenv_engine::settings::ReadinessPolicy;
use subenv_engine::{AllocationRequest, Engine, EngineSettings};

use crate::notifier::RecordingNotifier;
use crate::platform::FakePlatform;
use crate::store::TracingMappingStore;

/// Settings with a fast readiness poll, suitable for tests.
#[must_use]
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        readiness: ReadinessPolicy {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(500),
        },
        ..EngineSettings::default()
    }
}

/// Fast settings with a pool of `size` unreserved `test` slots.
#[must_use]
pub fn small_pool_settings(size: usize) -> EngineSettings {
    EngineSettings {
        pool: SlotPool::new("test", size),
        ..fast_settings()
    }
}

/// Test context with a recording store, fake platform and recording notifier
/// wired into an engine.
pub struct TestContext {
    /// Mapping store.
    pub store: Arc<TracingMappingStore>,
    /// Remote platform.
    pub platform: Arc<FakePlatform>,
    /// Chat notifier.
    pub notifier: Arc<RecordingNotifier>,
    /// The engine under test.
    pub engine: Engine,
}

impl TestContext {
    /// Default catalog, empty store, fast settings.
    #[must_use]
    pub fn new() -> Self {
        Self::build(
            FakePlatform::with_default_catalog(),
            TracingMappingStore::new(),
            fast_settings(),
        )
    }

    /// Wires an engine around the given parts.
    #[must_use]
    pub fn build(
        platform: FakePlatform,
        store: TracingMappingStore,
        settings: EngineSettings,
    ) -> Self {
        let store = Arc::new(store);
        let platform = Arc::new(platform);
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = Engine::new(
            store.clone(),
            platform.clone(),
            notifier.clone(),
            ServiceNameTable::builtin().expect("builtin service table"),
            settings,
        );
        Self {
            store,
            platform,
            notifier,
            engine,
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An allocation request from `dev@example.com`.
#[must_use]
pub fn request(branch: &str, service: &str) -> AllocationRequest {
    AllocationRequest {
        branch: branch.to_string(),
        service: service.to_string(),
        requester: "dev@example.com".to_string(),
    }
}

/// A record owned by `branch`.
#[must_use]
pub fn owned_record(id: &str, branch: &str, services: &[&str]) -> EnvironmentRecord {
    EnvironmentRecord::new(id.into(), branch, "dev@example.com", services.iter().copied())
}

/// A finished-workflow callback with no stages.
#[must_use]
pub fn callback(workflow: &str, status: &str, task_id: u64) -> DeploymentCallback {
    DeploymentCallback {
        object_kind: "workflow".to_string(),
        workflow: WorkflowEvent {
            project_name: "fat-base-envrionment".to_string(),
            workflow_name: workflow.to_string(),
            workflow_display_name: workflow.to_string(),
            task_id,
            status: status.to_string(),
            create_time: 1_700_000_000,
            end_time: 1_700_000_125,
            stages: Vec::new(),
            task_creator: "dev".to_string(),
            task_creator_email: "dev@example.com".to_string(),
        },
    }
}

/// A failed callback whose single stage lists `failed` jobs and one passing job.
#[must_use]
pub fn failed_callback(workflow: &str, task_id: u64, failed: &[&str]) -> DeploymentCallback {
    let mut cb = callback(workflow, "failed", task_id);
    let mut jobs: Vec<CallbackJob> = failed
        .iter()
        .map(|name| CallbackJob {
            name: (*name).to_string(),
            display_name: (*name).to_string(),
            status: "failed".to_string(),
        })
        .collect();
    jobs.push(CallbackJob {
        name: "ok".to_string(),
        display_name: "healthy-job".to_string(),
        status: "passed".to_string(),
    });
    cb.workflow.stages.push(CallbackStage {
        name: "check".to_string(),
        status: "failed".to_string(),
        jobs,
    });
    cb
}

/// Raw JSON for a passed callback, as the platform posts it.
#[must_use]
pub fn callback_json(workflow: &str, status: &str, task_id: u64) -> serde_json::Value {
    serde_json::json!({
        "object_kind": "workflow",
        "event": "workflow",
        "workflow": {
            "project_name": "fat-base-envrionment",
            "workflow_name": workflow,
            "workflow_display_name": workflow,
            "task_id": task_id,
            "status": status,
            "create_time": 1_700_000_000,
            "end_time": 1_700_000_065,
            "stages": [],
            "task_creator": "dev",
            "task_creator_email": "dev@example.com"
        }
    })
}
