//! Engine settings.
//!
//! Everything the engine needs to know about the shape of the remote
//! platform's project: which slots exist, how new environments are built,
//! how deployment tasks are described and where notifications go. Defaults
//! match the production project; the API binary overrides a subset from the
//! environment.

use std::time::Duration;

use subenv_core::{BranchPolicy, SlotPool};

/// Polling policy for the readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Delay between status polls.
    pub interval: Duration,
    /// Give up after this long.
    pub timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// How a freshly created environment is populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentTemplate {
    /// Charts installed at creation time.
    pub charts: Vec<String>,
    /// Target cluster id.
    pub cluster_id: String,
    /// Image registry id.
    pub registry_id: String,
    /// Base environment the new one shares traffic with.
    pub base_environment: String,
}

impl Default for EnvironmentTemplate {
    fn default() -> Self {
        Self {
            charts: [
                "redis-backoffice",
                "redis-general",
                "backoffice-v1-web-app",
                "bo-v1-assets",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            cluster_id: "64e48b5b8fc410571753cc6c".to_string(),
            registry_id: "64e485c78fc410571753cc67".to_string(),
            base_environment: "test33".to_string(),
        }
    }
}

/// The deployment run against every new environment before the requested
/// service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPlan {
    /// Service built by the bootstrap deployment.
    pub service: String,
    /// Branch template. `{ticket}` is replaced by the last segment of the
    /// requesting branch.
    pub branch_template: String,
    /// Services recorded as deployed once the bootstrap deployment is queued.
    pub recorded_services: Vec<String>,
}

impl Default for BootstrapPlan {
    fn default() -> Self {
        Self {
            service: "backoffice-v1-web".to_string(),
            branch_template: "feature/app/{ticket}".to_string(),
            recorded_services: vec!["backoffice-v1-web-app".to_string()],
        }
    }
}

impl BootstrapPlan {
    /// Branch the bootstrap build is taken from for `branch`.
    #[must_use]
    pub fn branch_for(&self, branch: &str) -> String {
        self.branch_template
            .replace("{ticket}", subenv_core::branch::last_segment(branch))
    }
}

/// Source repository defaults for build jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoDefaults {
    /// Code host kind.
    pub source: String,
    /// Repository owner.
    pub owner: String,
    /// Git remote name.
    pub remote_name: String,
    /// Code host id registered on the platform.
    pub codehost_id: u32,
}

impl Default for RepoDefaults {
    fn default() -> Self {
        Self {
            source: "github".to_string(),
            owner: "storehubnet".to_string(),
            remote_name: "origin".to_string(),
            codehost_id: 6,
        }
    }
}

/// Shape of the deployment workflow task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowTemplate {
    /// Workflow key. Callbacks carrying this name are sub-environment
    /// deployments.
    pub workflow_name: String,
    /// Workflow display name.
    pub display_name: String,
    /// Name of the workflow parameter holding the target environment.
    /// Must match the remote workflow definition.
    pub environment_param: String,
    /// Build stage name.
    pub stage_name: String,
    /// Build job name.
    pub job_name: String,
    /// Build job type.
    pub job_type: String,
    /// Repository defaults for the build job.
    pub repo: RepoDefaults,
}

impl Default for WorkflowTemplate {
    fn default() -> Self {
        Self {
            workflow_name: "test33".to_string(),
            display_name: "fat-base-workflow".to_string(),
            environment_param: "环境".to_string(),
            stage_name: "构建".to_string(),
            job_name: "构建发布".to_string(),
            job_type: "zadig-build".to_string(),
            repo: RepoDefaults::default(),
        }
    }
}

/// A templated message to a named chat group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMessage {
    /// Chat group display name.
    pub group: String,
    /// Card template id.
    pub template_id: String,
    /// Card title.
    pub title: String,
}

/// Notification routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    /// Card template sent to the requester when a deployment succeeds.
    pub deploy_success_template: String,
    /// Incident message for failed sub-environment deployments.
    pub deploy_failure: GroupMessage,
    /// Workflow name of the domain monitor.
    pub domain_monitor_workflow: String,
    /// Message for a passing domain monitor run.
    pub domain_ok: GroupMessage,
    /// Body of the passing domain monitor message.
    pub domain_ok_content: String,
    /// Incident message for a failing domain monitor run.
    pub domain_failure: GroupMessage,
    /// Prefix put in front of each failed job name in incident messages.
    pub incident_line_prefix: String,
    /// Base URL of the platform web console, used to link task pages.
    /// Empty disables the link.
    pub console_url: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            deploy_success_template: "ctp_AAz7KWuUUkkh".to_string(),
            deploy_failure: GroupMessage {
                group: "Engineering Incident Report Group".to_string(),
                template_id: "ctp_AAzXaSRdmtsX".to_string(),
                title: "子环境部署失败".to_string(),
            },
            domain_monitor_workflow: "domain-monitor".to_string(),
            domain_ok: GroupMessage {
                group: "Devops Notification".to_string(),
                template_id: "ctp_AAzXWvvEaFd5".to_string(),
                title: "域名监控运行成功".to_string(),
            },
            domain_ok_content: "所有域名运行正常，且没有在 30 天内到期的域名，无需任何操作。"
                .to_string(),
            domain_failure: GroupMessage {
                group: "Engineering Incident Report Group".to_string(),
                template_id: "ctp_AAzXaSRdmtsX".to_string(),
                title: "域名即将过期提醒".to_string(),
            },
            incident_line_prefix: "请关注：".to_string(),
            console_url: String::new(),
        }
    }
}

/// All engine settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSettings {
    /// Allocatable slots.
    pub pool: SlotPool,
    /// Branch naming rules.
    pub branch_policy: BranchPolicy,
    /// Readiness wait policy.
    pub readiness: ReadinessPolicy,
    /// New environment template.
    pub environment: EnvironmentTemplate,
    /// Bootstrap deployment.
    pub bootstrap: BootstrapPlan,
    /// Deployment workflow shape.
    pub workflow: WorkflowTemplate,
    /// Notification routing.
    pub notifications: NotificationSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_branch_uses_ticket_segment() {
        let plan = BootstrapPlan::default();
        assert_eq!(plan.branch_for("feature/ABC-1"), "feature/app/ABC-1");
        assert_eq!(plan.branch_for("feat/payments/PAY-7"), "feature/app/PAY-7");
    }

    #[test]
    fn defaults_reserve_the_base_environment() {
        let settings = EngineSettings::default();
        assert!(settings.pool.is_reserved(&settings.environment.base_environment));
        assert_eq!(settings.readiness.interval, Duration::from_secs(5));
    }
}
