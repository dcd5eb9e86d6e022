//! Deployment task submission and webhook correlation.
//!
//! Submitting a deployment returns a task id and nothing else; the platform
//! reports completion later through a webhook. The webhook payload is sparse
//! on success, so a passing sub-environment deployment triggers a task-detail
//! fetch to recover the environment, services and branches for the
//! requester's notification. A failing run already lists its failed jobs,
//! which is all the incident message needs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use subenv_core::observability::callback_span;
use subenv_core::{EnvironmentId, Error, Result, ServiceNameTable};
use tracing::Instrument;

use crate::metrics::EngineMetrics;
use crate::notify::{Notification, Notifier, NotifyTarget};
use crate::platform::{Platform, RepoCheckout, TaskRef, WorkflowTaskSpec};
use crate::settings::{EngineSettings, GroupMessage};

/// Status string the platform uses for a successful run.
pub const STATUS_PASSED: &str = "passed";

/// Job reported in a callback stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackJob {
    /// Job name.
    #[serde(default)]
    pub name: String,
    /// Human-readable job name.
    #[serde(default)]
    pub display_name: String,
    /// Job status.
    #[serde(default)]
    pub status: String,
}

/// Stage reported in a callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackStage {
    /// Stage name.
    #[serde(default)]
    pub name: String,
    /// Stage status.
    #[serde(default)]
    pub status: String,
    /// Jobs in the stage.
    #[serde(default)]
    pub jobs: Vec<CallbackJob>,
}

/// Workflow section of a callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Project name.
    #[serde(default)]
    pub project_name: String,
    /// Workflow key.
    #[serde(default)]
    pub workflow_name: String,
    /// Workflow display name.
    #[serde(default)]
    pub workflow_display_name: String,
    /// Task number.
    #[serde(default)]
    pub task_id: u64,
    /// Coarse run status.
    #[serde(default)]
    pub status: String,
    /// Task creation time, unix seconds.
    #[serde(default)]
    pub create_time: i64,
    /// Task end time, unix seconds.
    #[serde(default)]
    pub end_time: i64,
    /// Stages with their jobs.
    #[serde(default)]
    pub stages: Vec<CallbackStage>,
    /// Task creator's display name.
    #[serde(default)]
    pub task_creator: String,
    /// Task creator's email.
    #[serde(default)]
    pub task_creator_email: String,
}

impl WorkflowEvent {
    /// Returns true if the run passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == STATUS_PASSED
    }

    /// Display names of failed jobs across every stage.
    #[must_use]
    pub fn failed_jobs(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|s| s.jobs.iter())
            .filter(|j| j.status == "failed")
            .map(|j| {
                if j.display_name.is_empty() {
                    j.name.clone()
                } else {
                    j.display_name.clone()
                }
            })
            .collect()
    }

    /// Run duration as `mm:ss`.
    #[must_use]
    pub fn duration(&self) -> String {
        format_duration(self.end_time - self.create_time)
    }
}

/// Webhook payload sent by the platform when a workflow task finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentCallback {
    /// Event kind, informational.
    #[serde(default)]
    pub object_kind: String,
    /// The finished workflow.
    pub workflow: WorkflowEvent,
}

/// Known workflow kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowKind {
    /// Domain and certificate monitor.
    DomainMonitor,
    /// Sub-environment build and deploy.
    SubEnvironmentDeploy,
    /// Anything else.
    Unknown(String),
}

impl WorkflowKind {
    /// Metric label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::DomainMonitor => "domain_monitor",
            Self::SubEnvironmentDeploy => "sub_environment",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// What a callback led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// A notification was sent.
    Notified {
        /// Recipient.
        target: NotifyTarget,
    },
    /// Nothing to do.
    Ignored {
        /// Why.
        reason: String,
    },
}

/// Formats whole seconds as zero-padded `mm:ss`. Minutes are not capped.
#[must_use]
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Submits deployments and turns their callbacks into notifications.
#[derive(Clone)]
pub struct Correlator {
    platform: Arc<dyn Platform>,
    notifier: Arc<dyn Notifier>,
    service_names: Arc<ServiceNameTable>,
    settings: Arc<EngineSettings>,
    metrics: EngineMetrics,
}

impl Correlator {
    /// Creates a correlator.
    #[must_use]
    pub fn new(
        platform: Arc<dyn Platform>,
        notifier: Arc<dyn Notifier>,
        service_names: Arc<ServiceNameTable>,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            platform,
            notifier,
            service_names,
            settings,
            metrics: EngineMetrics::new(),
        }
    }

    /// Checks that `service` has a build target for `branch`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServiceNotFound` for a variant-only service when no
    /// variant matches `branch`.
    pub fn check_buildable(&self, service: &str, branch: &str) -> Result<()> {
        self.service_names.resolve(service, branch).map(|_| ())
    }

    /// Builds the workflow task for `service` from `branch` into `environment`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServiceNotFound` if no build target matches `branch`.
    pub fn task_spec(
        &self,
        environment: &EnvironmentId,
        service: &str,
        branch: &str,
    ) -> Result<WorkflowTaskSpec> {
        let target = self.service_names.resolve(service, branch)?;
        let workflow = &self.settings.workflow;
        Ok(WorkflowTaskSpec {
            workflow_name: workflow.workflow_name.clone(),
            display_name: workflow.display_name.clone(),
            environment_param: workflow.environment_param.clone(),
            environment: environment.clone(),
            stage_name: workflow.stage_name.clone(),
            job_name: workflow.job_name.clone(),
            job_type: workflow.job_type.clone(),
            repo: RepoCheckout {
                source: workflow.repo.source.clone(),
                owner: workflow.repo.owner.clone(),
                repo_name: target.repo_name.clone(),
                remote_name: workflow.repo.remote_name.clone(),
                branch: branch.to_string(),
                codehost_id: workflow.repo.codehost_id,
            },
            target,
        })
    }

    /// Submits a build-and-deploy task.
    ///
    /// Not retried here; the HTTP transport retries transient failures.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServiceNotFound` if no build target matches `branch` and
    /// `Error::Submission` if the platform rejects the task.
    #[tracing::instrument(skip(self, environment), fields(environment = %environment))]
    pub async fn submit_deployment(
        &self,
        environment: &EnvironmentId,
        service: &str,
        branch: &str,
        requester: &str,
    ) -> Result<TaskRef> {
        let spec = self.task_spec(environment, service, branch)?;
        match self.platform.submit_workflow_task(&spec).await {
            Ok(task) => {
                self.metrics.record_deployment("success");
                tracing::info!(task_id = task.task_id, build = %spec.target.build_name, "deployment submitted");
                Ok(task)
            }
            Err(err) => {
                self.metrics.record_deployment("failure");
                Err(match err {
                    Error::Submission { .. } => err,
                    other => Error::submission(other.to_string()),
                })
            }
        }
    }

    /// Classifies a workflow name.
    #[must_use]
    pub fn classify(&self, workflow_name: &str) -> WorkflowKind {
        if workflow_name == self.settings.notifications.domain_monitor_workflow {
            WorkflowKind::DomainMonitor
        } else if workflow_name == self.settings.workflow.workflow_name {
            WorkflowKind::SubEnvironmentDeploy
        } else {
            WorkflowKind::Unknown(workflow_name.to_string())
        }
    }

    /// Handles a finished-workflow callback.
    ///
    /// # Errors
    ///
    /// Returns the task-detail fetch or notification error. Unknown workflows
    /// are not errors.
    pub async fn on_callback(&self, callback: &DeploymentCallback) -> Result<CallbackOutcome> {
        let event = &callback.workflow;
        let kind = self.classify(&event.workflow_name);
        self.metrics.record_callback(kind.label(), &event.status);

        let span = callback_span(&event.workflow_name, event.task_id);
        async move {
            tracing::info!(status = %event.status, project = %event.project_name, "workflow callback received");
            match kind {
                WorkflowKind::DomainMonitor => self.domain_monitor(event).await,
                WorkflowKind::SubEnvironmentDeploy if event.passed() => {
                    self.deployment_passed(event).await
                }
                WorkflowKind::SubEnvironmentDeploy => {
                    let msg = &self.settings.notifications.deploy_failure;
                    self.incident(msg, &event.failed_jobs()).await
                }
                WorkflowKind::Unknown(name) => {
                    tracing::warn!(workflow = %name, "callback for unknown workflow ignored");
                    Ok(CallbackOutcome::Ignored {
                        reason: format!("unknown workflow {name}"),
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn domain_monitor(&self, event: &WorkflowEvent) -> Result<CallbackOutcome> {
        let settings = &self.settings.notifications;
        if event.passed() {
            let notification = Notification::new(
                NotifyTarget::Group(settings.domain_ok.group.clone()),
                settings.domain_ok.template_id.clone(),
            )
            .with("title", settings.domain_ok.title.clone())
            .with("content", settings.domain_ok_content.clone());
            return self.deliver(notification).await;
        }
        self.incident(&settings.domain_failure, &event.failed_jobs())
            .await
    }

    async fn deployment_passed(&self, event: &WorkflowEvent) -> Result<CallbackOutcome> {
        if event.task_creator_email.is_empty() {
            tracing::warn!("passed deployment has no creator email, not notifying");
            return Ok(CallbackOutcome::Ignored {
                reason: "no requester email".to_string(),
            });
        }

        let detail = self
            .platform
            .task_detail(&event.workflow_name, event.task_id)
            .await?;
        let workflow = &self.settings.workflow;
        let environment = detail.param(&workflow.environment_param).unwrap_or_default();

        let notification = Notification::new(
            NotifyTarget::User(event.task_creator_email.clone()),
            self.settings.notifications.deploy_success_template.clone(),
        )
        .with("project_name", event.project_name.clone())
        .with("workflow_name", workflow.display_name.clone())
        .with("workflow_number", event.task_id.to_string())
        .with("duration", event.duration())
        .with("host", self.task_link(event))
        .with("sub_env", environment)
        .with("service", detail.services().join("\n"))
        .with("branch", detail.branches().join("\n"));
        self.deliver(notification).await
    }

    async fn incident(&self, message: &GroupMessage, failed: &[String]) -> Result<CallbackOutcome> {
        let prefix = &self.settings.notifications.incident_line_prefix;
        let content = failed
            .iter()
            .map(|name| format!("{prefix}{name}"))
            .collect::<Vec<_>>()
            .join("\n");
        let notification = Notification::new(
            NotifyTarget::Group(message.group.clone()),
            message.template_id.clone(),
        )
        .with("title", message.title.clone())
        .with("content", content);
        self.deliver(notification).await
    }

    fn task_link(&self, event: &WorkflowEvent) -> String {
        let console = self.settings.notifications.console_url.trim_end_matches('/');
        if console.is_empty() {
            return String::new();
        }
        format!(
            "{console}/v1/projects/detail/{}/pipelines/custom/{}/{}?status={}&id=&display_name={}",
            event.project_name,
            event.workflow_name,
            event.task_id,
            event.status,
            self.settings.workflow.display_name,
        )
    }

    async fn deliver(&self, notification: Notification) -> Result<CallbackOutcome> {
        match self.notifier.send(&notification).await {
            Ok(()) => {
                self.metrics.record_notification("success");
                Ok(CallbackOutcome::Notified {
                    target: notification.target,
                })
            }
            Err(err) => {
                self.metrics.record_notification("failure");
                tracing::warn!(recipient = %notification.target, error = %err, "notification failed");
                Err(err)
            }
        }
    }
}
