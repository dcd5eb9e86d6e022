//! Remote deployment platform contract.
//!
//! The platform owns environments, charts and workflow tasks. The engine
//! only ever talks to it through [`Platform`]; the HTTP client lives in the
//! API crate and tests use an in-memory fake.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subenv_core::{BuildTarget, EnvironmentId, Result};

/// Environment summary as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEnvironment {
    /// Environment key (slot name).
    pub env_key: String,
    /// Kubernetes namespace.
    #[serde(default)]
    pub namespace: String,
    /// Raw platform status.
    #[serde(default)]
    pub status: String,
    /// Last actor to change the environment.
    #[serde(default)]
    pub update_by: String,
    /// Last change time, unix seconds.
    #[serde(default)]
    pub update_time: i64,
}

impl RemoteEnvironment {
    /// Environment id.
    #[must_use]
    pub fn id(&self) -> EnvironmentId {
        EnvironmentId::new(self.env_key.clone())
    }
}

/// Coarse environment status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentStatus {
    /// Ready to receive deployments.
    Ready,
    /// Terminal failure.
    Failed(String),
    /// Anything else: still converging.
    Pending(String),
}

impl EnvironmentStatus {
    /// Maps the platform's raw status string.
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "success" => Self::Ready,
            "error" | "failed" => Self::Failed(raw.to_string()),
            other => Self::Pending(other.to_string()),
        }
    }
}

/// Detail for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDetail {
    /// Environment key.
    pub env_key: String,
    /// Raw platform status.
    #[serde(default)]
    pub status: String,
    /// Last actor to change the environment.
    #[serde(default)]
    pub update_by: String,
    /// Deployed service names.
    #[serde(default)]
    pub services: Vec<String>,
}

impl EnvironmentDetail {
    /// Coarse status.
    #[must_use]
    pub fn status(&self) -> EnvironmentStatus {
        EnvironmentStatus::from_raw(&self.status)
    }
}

/// A chart to install, at a pinned version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSelection {
    /// Service (chart) name.
    pub service_name: String,
    /// Chart version.
    pub chart_version: String,
}

/// Deployable charts and their current versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChartCatalog(BTreeMap<String, String>);

impl ChartCatalog {
    /// Builds a catalog from selections.
    #[must_use]
    pub fn new(charts: impl IntoIterator<Item = ChartSelection>) -> Self {
        Self(
            charts
                .into_iter()
                .map(|c| (c.service_name, c.chart_version))
                .collect(),
        )
    }

    /// Looks up a chart.
    #[must_use]
    pub fn get(&self, service: &str) -> Option<ChartSelection> {
        self.0.get(service).map(|version| ChartSelection {
            service_name: service.to_string(),
            chart_version: version.clone(),
        })
    }

    /// Returns true if `service` is deployable.
    #[must_use]
    pub fn contains(&self, service: &str) -> bool {
        self.0.contains_key(service)
    }

    /// Every chart, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = ChartSelection> + '_ {
        self.0.iter().map(|(name, version)| ChartSelection {
            service_name: name.clone(),
            chart_version: version.clone(),
        })
    }

    /// Number of charts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Request to create a shared sub-environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateEnvironment {
    /// New environment id.
    pub id: EnvironmentId,
    /// Charts installed at creation.
    pub charts: Vec<ChartSelection>,
    /// Target cluster.
    pub cluster_id: String,
    /// Image registry.
    pub registry_id: String,
    /// Base environment to share with.
    pub base_environment: String,
}

/// Repository checkout for a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCheckout {
    /// Code host kind.
    pub source: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo_name: String,
    /// Git remote.
    pub remote_name: String,
    /// Branch to build.
    pub branch: String,
    /// Code host id.
    pub codehost_id: u32,
}

/// A named workflow parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParam {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    #[serde(default)]
    pub value: String,
}

/// Everything needed to start one build-and-deploy workflow task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowTaskSpec {
    /// Workflow key.
    pub workflow_name: String,
    /// Workflow display name.
    pub display_name: String,
    /// Name of the environment parameter.
    pub environment_param: String,
    /// Target environment.
    pub environment: EnvironmentId,
    /// Build stage name.
    pub stage_name: String,
    /// Build job name.
    pub job_name: String,
    /// Build job type.
    pub job_type: String,
    /// Build target for the service.
    pub target: BuildTarget,
    /// Repository checkout.
    pub repo: RepoCheckout,
}

/// Handle to a submitted workflow task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    /// Project the task runs in.
    #[serde(default)]
    pub project_name: String,
    /// Workflow key.
    pub workflow_name: String,
    /// Task number.
    pub task_id: u64,
}

/// Service identity of a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Service the job built.
    #[serde(default)]
    pub service_name: String,
}

/// Repository a job built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRepo {
    /// Repository name.
    #[serde(default)]
    pub repo_name: String,
    /// Branch built.
    #[serde(default)]
    pub branch: String,
}

/// Job spec as reported in a task detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Repositories built.
    #[serde(default)]
    pub repos: Vec<JobRepo>,
}

/// One job of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskJob {
    /// Job name.
    #[serde(default)]
    pub name: String,
    /// Job status.
    #[serde(default)]
    pub status: String,
    /// Service identity.
    #[serde(default)]
    pub job_info: JobInfo,
    /// Job spec.
    #[serde(default)]
    pub spec: JobSpec,
}

/// One stage of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStage {
    /// Stage name.
    #[serde(default)]
    pub name: String,
    /// Jobs in the stage.
    #[serde(default)]
    pub jobs: Vec<TaskJob>,
}

/// Full detail of a workflow task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetail {
    /// Task number.
    #[serde(default)]
    pub task_id: u64,
    /// Workflow key.
    #[serde(default)]
    pub workflow_key: String,
    /// Workflow parameters.
    #[serde(default)]
    pub params: Vec<TaskParam>,
    /// Stages.
    #[serde(default)]
    pub stages: Vec<TaskStage>,
}

impl TaskDetail {
    /// Value of the parameter `name`, if present.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Services built by every job, in stage order.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|s| s.jobs.iter())
            .map(|j| j.job_info.service_name.clone())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Branches built by every job, in stage order.
    #[must_use]
    pub fn branches(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|s| s.jobs.iter())
            .flat_map(|j| j.spec.repos.iter())
            .map(|r| r.branch.clone())
            .filter(|b| !b.is_empty())
            .collect()
    }
}

/// Operations the engine needs from the deployment platform.
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Lists every environment in the project.
    async fn list_environments(&self) -> Result<Vec<RemoteEnvironment>>;

    /// Fetches one environment's detail.
    async fn environment_detail(&self, id: &EnvironmentId) -> Result<EnvironmentDetail>;

    /// Fetches the deployable chart catalog.
    async fn chart_catalog(&self) -> Result<ChartCatalog>;

    /// Creates a shared sub-environment. Returns once the request is
    /// accepted; the environment is not ready yet.
    async fn create_environment(&self, request: &CreateEnvironment) -> Result<()>;

    /// Installs a chart into an existing environment.
    async fn add_service(&self, id: &EnvironmentId, chart: &ChartSelection) -> Result<()>;

    /// Starts a workflow task.
    async fn submit_workflow_task(&self, spec: &WorkflowTaskSpec) -> Result<TaskRef>;

    /// Fetches a workflow task's detail.
    async fn task_detail(&self, workflow_key: &str, task_id: u64) -> Result<TaskDetail>;
}
