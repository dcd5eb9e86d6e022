//! In-memory deployment platform with operation recording.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use subenv_core::{EnvironmentId, Error, Result};
use subenv_engine::platform::{
    ChartCatalog, ChartSelection, CreateEnvironment, EnvironmentDetail, JobInfo, JobRepo, JobSpec,
    Platform, RemoteEnvironment, TaskDetail, TaskJob, TaskParam, TaskRef, TaskStage,
    WorkflowTaskSpec,
};

/// Project name reported on fake task handles.
pub const FAKE_PROJECT: &str = "fake-project";

/// Record of a platform call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformOp {
    /// Environment list fetched.
    ListEnvironments,
    /// Environment detail fetched.
    EnvironmentDetail {
        /// Environment id.
        id: String,
    },
    /// Chart catalog fetched.
    ChartCatalog,
    /// Environment created.
    CreateEnvironment {
        /// Environment id.
        id: String,
        /// Installed chart names.
        charts: Vec<String>,
    },
    /// Chart installed into an environment.
    AddService {
        /// Environment id.
        id: String,
        /// Chart name.
        service: String,
    },
    /// Workflow task submitted.
    SubmitWorkflowTask {
        /// Target environment.
        environment: String,
        /// Build name.
        build_name: String,
        /// Branch built.
        branch: String,
    },
    /// Task detail fetched.
    TaskDetail {
        /// Workflow key.
        workflow_key: String,
        /// Task number.
        task_id: u64,
    },
}

/// Calls that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    /// Every environment list.
    ListEnvironments,
    /// Detail of one environment.
    EnvironmentDetail(String),
    /// Every catalog fetch.
    ChartCatalog,
    /// Every environment creation.
    CreateEnvironment,
    /// Every chart installation.
    AddService,
    /// Submissions for one build name.
    SubmitBuild(String),
    /// Every task detail fetch.
    TaskDetail,
}

/// An environment held by the fake.
#[derive(Debug, Clone)]
pub struct FakeEnvironment {
    /// Status reported once settled.
    pub settled_status: String,
    /// Detail polls left before the settled status is reported.
    pub pending_polls: u32,
    /// Last actor.
    pub update_by: String,
    /// Deployed services.
    pub services: Vec<String>,
}

#[derive(Debug)]
struct State {
    environments: BTreeMap<String, FakeEnvironment>,
    catalog: ChartCatalog,
    ready_after_polls: u32,
    created_status: String,
    next_task_id: u64,
    task_details: HashMap<u64, TaskDetail>,
    created: Vec<CreateEnvironment>,
    submitted: Vec<WorkflowTaskSpec>,
}

/// Fake [`Platform`] backed by in-memory state.
///
/// New environments report `creating` for a configurable number of polls,
/// then settle on `success` (or whatever [`FakePlatform::with_created_status`]
/// sets). Submitted tasks get sequential ids and a matching task detail.
#[derive(Debug, Clone)]
pub struct FakePlatform {
    state: Arc<Mutex<State>>,
    operations: Arc<Mutex<Vec<PlatformOp>>>,
    fail_points: Arc<Mutex<Vec<FailPoint>>>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    /// Creates a platform with an empty catalog and no environments.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                environments: BTreeMap::new(),
                catalog: ChartCatalog::default(),
                ready_after_polls: 1,
                created_status: "success".to_string(),
                next_task_id: 1,
                task_details: HashMap::new(),
                created: Vec::new(),
                submitted: Vec::new(),
            })),
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_points: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Creates a platform whose catalog holds the environment template charts
    /// and a handful of services.
    #[must_use]
    pub fn with_default_catalog() -> Self {
        Self::new().with_charts([
            ("redis-backoffice", "0.1.0"),
            ("redis-general", "0.1.0"),
            ("backoffice-v1-web-app", "2.4.0"),
            ("bo-v1-assets", "1.0.3"),
            ("payment-api", "3.2.1"),
            ("auth-api", "1.8.0"),
            ("core-api", "5.0.2"),
            ("inventory-svc", "1.1.0"),
        ])
    }

    /// Adds charts to the catalog.
    #[must_use]
    pub fn with_charts<'a>(self, charts: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        {
            let mut state = self.state.lock().expect("lock");
            let mut all: Vec<ChartSelection> = state.catalog.iter().collect();
            all.extend(charts.into_iter().map(|(name, version)| ChartSelection {
                service_name: name.to_string(),
                chart_version: version.to_string(),
            }));
            state.catalog = ChartCatalog::new(all);
        }
        self
    }

    /// Adds a ready environment.
    #[must_use]
    pub fn with_environment<'a>(
        self,
        id: &str,
        update_by: &str,
        services: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.state.lock().expect("lock").environments.insert(
            id.to_string(),
            FakeEnvironment {
                settled_status: "success".to_string(),
                pending_polls: 0,
                update_by: update_by.to_string(),
                services: services.into_iter().map(str::to_string).collect(),
            },
        );
        self
    }

    /// Adds ready, empty environments for every id.
    #[must_use]
    pub fn with_environments<'a>(self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        ids.into_iter()
            .fold(self, |p, id| p.with_environment(id, "ops", []))
    }

    /// Number of `creating` polls a new environment reports before settling.
    #[must_use]
    pub fn with_ready_after(self, polls: u32) -> Self {
        self.state.lock().expect("lock").ready_after_polls = polls;
        self
    }

    /// New environments never leave `creating`.
    #[must_use]
    pub fn never_ready(self) -> Self {
        self.with_ready_after(u32::MAX)
    }

    /// Status new environments settle on.
    #[must_use]
    pub fn with_created_status(self, status: &str) -> Self {
        self.state.lock().expect("lock").created_status = status.to_string();
        self
    }

    /// Registers the detail returned for a task id.
    pub fn put_task_detail(&self, task_id: u64, detail: TaskDetail) {
        self.state
            .lock()
            .expect("lock")
            .task_details
            .insert(task_id, detail);
    }

    /// Removes an environment, as if deleted on the platform.
    pub fn remove_environment(&self, id: &str) {
        self.state.lock().expect("lock").environments.remove(id);
    }

    /// Injects a failure.
    pub fn inject_failure(&self, point: FailPoint) {
        self.fail_points.lock().expect("lock").push(point);
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_points.lock().expect("lock").clear();
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<PlatformOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Counts recorded operations matching `pred`.
    #[must_use]
    pub fn count(&self, pred: impl Fn(&PlatformOp) -> bool) -> usize {
        self.operations
            .lock()
            .expect("lock")
            .iter()
            .filter(|op| pred(op))
            .count()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Environments created so far.
    #[must_use]
    pub fn created(&self) -> Vec<CreateEnvironment> {
        self.state.lock().expect("lock").created.clone()
    }

    /// Tasks submitted so far.
    #[must_use]
    pub fn submitted(&self) -> Vec<WorkflowTaskSpec> {
        self.state.lock().expect("lock").submitted.clone()
    }

    /// Ids of every environment on the platform.
    #[must_use]
    pub fn environment_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("lock")
            .environments
            .keys()
            .cloned()
            .collect()
    }

    /// Services deployed in `id`.
    #[must_use]
    pub fn services_of(&self, id: &str) -> Vec<String> {
        self.state
            .lock()
            .expect("lock")
            .environments
            .get(id)
            .map(|e| e.services.clone())
            .unwrap_or_default()
    }

    fn record(&self, op: PlatformOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check(&self, point: &FailPoint) -> Result<()> {
        if self.fail_points.lock().expect("lock").contains(point) {
            return Err(Error::remote_status(500, format!("injected failure: {point:?}")));
        }
        Ok(())
    }
}

fn detail_for(spec: &WorkflowTaskSpec, task_id: u64) -> TaskDetail {
    TaskDetail {
        task_id,
        workflow_key: spec.workflow_name.clone(),
        params: vec![TaskParam {
            name: spec.environment_param.clone(),
            value: spec.environment.to_string(),
        }],
        stages: vec![TaskStage {
            name: spec.stage_name.clone(),
            jobs: vec![TaskJob {
                name: spec.job_name.clone(),
                status: "passed".to_string(),
                job_info: JobInfo {
                    service_name: spec.target.service_name.clone(),
                },
                spec: JobSpec {
                    repos: vec![JobRepo {
                        repo_name: spec.repo.repo_name.clone(),
                        branch: spec.repo.branch.clone(),
                    }],
                },
            }],
        }],
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn list_environments(&self) -> Result<Vec<RemoteEnvironment>> {
        self.record(PlatformOp::ListEnvironments);
        self.check(&FailPoint::ListEnvironments)?;
        let state = self.state.lock().expect("lock");
        Ok(state
            .environments
            .iter()
            .map(|(id, env)| RemoteEnvironment {
                env_key: id.clone(),
                namespace: id.clone(),
                status: env.settled_status.clone(),
                update_by: env.update_by.clone(),
                update_time: 0,
            })
            .collect())
    }

    async fn environment_detail(&self, id: &EnvironmentId) -> Result<EnvironmentDetail> {
        self.record(PlatformOp::EnvironmentDetail { id: id.to_string() });
        self.check(&FailPoint::EnvironmentDetail(id.to_string()))?;
        let mut state = self.state.lock().expect("lock");
        let env = state
            .environments
            .get_mut(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("environment {id}")))?;
        let status = if env.pending_polls > 0 {
            env.pending_polls -= 1;
            "creating".to_string()
        } else {
            env.settled_status.clone()
        };
        Ok(EnvironmentDetail {
            env_key: id.to_string(),
            status,
            update_by: env.update_by.clone(),
            services: env.services.clone(),
        })
    }

    async fn chart_catalog(&self) -> Result<ChartCatalog> {
        self.record(PlatformOp::ChartCatalog);
        self.check(&FailPoint::ChartCatalog)?;
        Ok(self.state.lock().expect("lock").catalog.clone())
    }

    async fn create_environment(&self, request: &CreateEnvironment) -> Result<()> {
        self.record(PlatformOp::CreateEnvironment {
            id: request.id.to_string(),
            charts: request
                .charts
                .iter()
                .map(|c| c.service_name.clone())
                .collect(),
        });
        self.check(&FailPoint::CreateEnvironment)?;
        let mut state = self.state.lock().expect("lock");
        if state.environments.contains_key(request.id.as_str()) {
            return Err(Error::remote_status(400, format!("{} already exists", request.id)));
        }
        let env = FakeEnvironment {
            settled_status: state.created_status.clone(),
            pending_polls: state.ready_after_polls,
            update_by: "fake-platform".to_string(),
            services: request
                .charts
                .iter()
                .map(|c| c.service_name.clone())
                .collect(),
        };
        state.environments.insert(request.id.to_string(), env);
        state.created.push(request.clone());
        Ok(())
    }

    async fn add_service(&self, id: &EnvironmentId, chart: &ChartSelection) -> Result<()> {
        self.record(PlatformOp::AddService {
            id: id.to_string(),
            service: chart.service_name.clone(),
        });
        self.check(&FailPoint::AddService)?;
        let mut state = self.state.lock().expect("lock");
        let env = state
            .environments
            .get_mut(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("environment {id}")))?;
        if !env.services.contains(&chart.service_name) {
            env.services.push(chart.service_name.clone());
        }
        Ok(())
    }

    async fn submit_workflow_task(&self, spec: &WorkflowTaskSpec) -> Result<TaskRef> {
        self.record(PlatformOp::SubmitWorkflowTask {
            environment: spec.environment.to_string(),
            build_name: spec.target.build_name.clone(),
            branch: spec.repo.branch.clone(),
        });
        self.check(&FailPoint::SubmitBuild(spec.target.build_name.clone()))?;
        let mut state = self.state.lock().expect("lock");
        let task_id = state.next_task_id;
        state.next_task_id += 1;
        state.task_details.insert(task_id, detail_for(spec, task_id));
        state.submitted.push(spec.clone());
        Ok(TaskRef {
            project_name: FAKE_PROJECT.to_string(),
            workflow_name: spec.workflow_name.clone(),
            task_id,
        })
    }

    async fn task_detail(&self, workflow_key: &str, task_id: u64) -> Result<TaskDetail> {
        self.record(PlatformOp::TaskDetail {
            workflow_key: workflow_key.to_string(),
            task_id,
        });
        self.check(&FailPoint::TaskDetail)?;
        self.state
            .lock()
            .expect("lock")
            .task_details
            .get(&task_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {workflow_key}#{task_id}")))
    }
}
