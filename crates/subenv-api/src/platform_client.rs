//! HTTP client for the deployment platform.
//!
//! Implements [`Platform`] over the platform's REST API with bearer-token
//! auth. Reads are retried on transient failures; mutations (environment
//! creation, chart installs, workflow tasks) are sent exactly once.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use subenv_core::{EnvironmentId, Error, Redacted, Result};
use subenv_engine::platform::{
    ChartCatalog, ChartSelection, CreateEnvironment, EnvironmentDetail, Platform,
    RemoteEnvironment, TaskDetail, TaskRef, WorkflowTaskSpec,
};

use crate::config::PlatformConfig;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: usize = 3;
const DEFAULT_BASE_ENVIRONMENT: &str = "test33";
const DEPLOY_STRATEGY: &str = "deploy";
const REPLACE_POLICY: &str = "notUseEnvImage";

/// Whether a failed request may be sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    Transient,
    Never,
}

/// HTTP client for the deployment platform.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    base_url: String,
    token: Redacted<String>,
    project: String,
    base_environment: String,
    client: reqwest::Client,
}

impl PlatformClient {
    /// Creates a client for `project` on the platform at `base_url`.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            token: Redacted(token.into()),
            project: project.into(),
            base_environment: DEFAULT_BASE_ENVIRONMENT.to_string(),
            client: build_client(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the base URL or token is missing.
    pub fn from_config(config: &PlatformConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("platform base URL is required".to_string()))?;
        let token = config
            .api_token
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("platform API token is required".to_string()))?;
        Ok(Self::new(base_url, token.expose().clone(), config.project.clone())
            .with_timeout(config.request_timeout()))
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Sets the base environment whose chart catalog is offered to new
    /// sub-environments.
    #[must_use]
    pub fn with_base_environment(mut self, base: impl Into<String>) -> Self {
        self.base_environment = base.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn environments_url(&self) -> String {
        self.url("api/aslan/environment/environments")
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T> {
        let url = self.url(path);
        let response = self
            .execute(|| self.client.get(&url).query(query), Retry::Transient, what)
            .await?;
        decode(response, what).await
    }

    /// Sends a request, retrying per `retry`, and returns the successful response.
    async fn execute<F>(&self, build: F, retry: Retry, what: &str) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let response = build().bearer_auth(self.token.expose()).send().await;

            match response {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    if retry == Retry::Transient && status.is_server_error() && attempt < MAX_ATTEMPTS
                    {
                        tracing::debug!(%status, attempt, what, "retrying platform call");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    let body = resp.bytes().await.unwrap_or_default();
                    return Err(status_error(status, &body, what));
                }
                Err(err) => {
                    // Timeouts fail fast.
                    if err.is_timeout() {
                        return Err(Error::remote(format!("{what} timed out: {err}")));
                    }
                    if retry == Retry::Transient && attempt < MAX_ATTEMPTS {
                        tracing::debug!(error = %err, attempt, what, "retrying platform call");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                    return Err(Error::remote(format!("{what} failed: {err}")));
                }
            }
        }
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn backoff(attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    let backoff_ms = 50_u64
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(500);
    Duration::from_millis(backoff_ms)
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "description", "err_message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).to_string())
}

fn status_error(status: StatusCode, body: &[u8], what: &str) -> Error {
    let message = error_message(body);
    if status == StatusCode::NOT_FOUND {
        return Error::NotFound(format!("{what}: {message}"));
    }
    Error::remote_status(status.as_u16(), format!("{what} failed ({status}): {message}"))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| Error::Serialization {
            message: format!("invalid {what} response: {e}"),
        })
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireService {
    #[serde(default)]
    service_name: String,
}

#[derive(Debug, Deserialize)]
struct WireEnvironmentDetail {
    #[serde(default)]
    env_key: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    update_by: String,
    #[serde(default)]
    services: Vec<WireService>,
}

impl From<WireEnvironmentDetail> for EnvironmentDetail {
    fn from(wire: WireEnvironmentDetail) -> Self {
        Self {
            env_key: wire.env_key,
            status: wire.status,
            update_by: wire.update_by,
            services: wire
                .services
                .into_iter()
                .map(|s| s.service_name)
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InitInfo {
    #[serde(default)]
    chart_infos: Vec<ChartSelection>,
}

#[derive(Debug, Serialize)]
struct ChartValue<'a> {
    #[serde(rename = "envName")]
    env_name: &'a str,
    #[serde(rename = "serviceName")]
    service_name: &'a str,
    #[serde(rename = "releaseName", skip_serializing_if = "Option::is_none")]
    release_name: Option<&'a str>,
    #[serde(rename = "chartVersion")]
    chart_version: &'a str,
    deploy_strategy: &'static str,
}

#[derive(Debug, Serialize)]
struct ShareEnv<'a> {
    enable: bool,
    #[serde(rename = "isBase")]
    is_base: bool,
    base_env: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateEnvironmentBody<'a> {
    env_name: &'a str,
    cluster_id: &'a str,
    registry_id: &'a str,
    #[serde(rename = "chartValues")]
    chart_values: Vec<ChartValue<'a>>,
    namespace: &'a str,
    is_existed: bool,
    share_env: ShareEnv<'a>,
}

#[derive(Debug, Serialize)]
struct AddServiceBody<'a> {
    #[serde(rename = "replacePolicy")]
    replace_policy: &'static str,
    #[serde(rename = "envNames")]
    env_names: Vec<&'a str>,
    #[serde(rename = "chartValues")]
    chart_values: Vec<ChartValue<'a>>,
}

#[derive(Debug, Deserialize)]
struct AddServiceResult {
    #[serde(default)]
    env_name: String,
    #[serde(default)]
    err_message: String,
}

#[derive(Debug, Serialize)]
struct WorkflowParam<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct KeyVal {
    key: &'static str,
    value: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct WireRepo<'a> {
    source: &'a str,
    repo_owner: &'a str,
    repo_namespace: &'a str,
    repo_name: &'a str,
    remote_name: &'a str,
    branch: &'a str,
    codehost_id: u32,
}

#[derive(Debug, Serialize)]
struct ServiceAndBuild<'a> {
    service_name: &'a str,
    service_module: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    build_name: Option<&'a str>,
    key_vals: Vec<KeyVal>,
    repos: Vec<WireRepo<'a>>,
}

#[derive(Debug, Serialize)]
struct BuildJobSpec<'a> {
    default_service_and_builds: Vec<ServiceAndBuild<'a>>,
    service_and_builds: Vec<ServiceAndBuild<'a>>,
}

#[derive(Debug, Serialize)]
struct WorkflowJob<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    spec: BuildJobSpec<'a>,
}

#[derive(Debug, Serialize)]
struct WorkflowStage<'a> {
    name: &'a str,
    jobs: Vec<WorkflowJob<'a>>,
}

#[derive(Debug, Serialize)]
struct WorkflowTaskBody<'a> {
    name: &'a str,
    display_name: &'a str,
    project: &'a str,
    params: Vec<WorkflowParam<'a>>,
    stages: Vec<WorkflowStage<'a>>,
}

impl<'a> WorkflowTaskBody<'a> {
    fn new(project: &'a str, spec: &'a WorkflowTaskSpec) -> Self {
        let repo = || WireRepo {
            source: &spec.repo.source,
            repo_owner: &spec.repo.owner,
            repo_namespace: &spec.repo.owner,
            repo_name: &spec.repo.repo_name,
            remote_name: &spec.repo.remote_name,
            branch: &spec.repo.branch,
            codehost_id: spec.repo.codehost_id,
        };
        let key_vals = || {
            vec![KeyVal {
                key: "ENV_NAME",
                value: format!("{{{{.workflow.params.{}}}}}", spec.environment_param),
                kind: "string",
            }]
        };
        let target = &spec.target;

        Self {
            name: &spec.workflow_name,
            display_name: &spec.display_name,
            project,
            params: vec![WorkflowParam {
                name: &spec.environment_param,
                kind: "choice",
                value: spec.environment.as_str(),
            }],
            stages: vec![WorkflowStage {
                name: &spec.stage_name,
                jobs: vec![WorkflowJob {
                    name: &spec.job_name,
                    kind: &spec.job_type,
                    spec: BuildJobSpec {
                        default_service_and_builds: vec![ServiceAndBuild {
                            service_name: &target.service_name,
                            service_module: &target.service_module,
                            build_name: None,
                            key_vals: key_vals(),
                            repos: vec![repo()],
                        }],
                        service_and_builds: vec![ServiceAndBuild {
                            service_name: &target.service_name,
                            service_module: &target.service_module,
                            build_name: Some(&target.build_name),
                            key_vals: key_vals(),
                            repos: vec![repo()],
                        }],
                    },
                }],
            }],
        }
    }
}

// ============================================================================
// Platform Implementation
// ============================================================================

#[async_trait]
impl Platform for PlatformClient {
    async fn list_environments(&self) -> Result<Vec<RemoteEnvironment>> {
        self.get_json(
            "openapi/environments",
            &[("projectKey", self.project.as_str())],
            "list environments",
        )
        .await
    }

    async fn environment_detail(&self, id: &EnvironmentId) -> Result<EnvironmentDetail> {
        let wire: WireEnvironmentDetail = self
            .get_json(
                &format!("openapi/environments/{id}"),
                &[("projectKey", self.project.as_str())],
                "environment detail",
            )
            .await?;
        Ok(wire.into())
    }

    async fn chart_catalog(&self) -> Result<ChartCatalog> {
        let info: InitInfo = self
            .get_json(
                &format!("api/aslan/environment/init_info/{}", self.project),
                &[
                    ("envType", "share"),
                    ("isBaseEnv", "false"),
                    ("baseEnv", self.base_environment.as_str()),
                    ("projectName", self.project.as_str()),
                ],
                "chart catalog",
            )
            .await?;
        Ok(ChartCatalog::new(info.chart_infos))
    }

    async fn create_environment(&self, request: &CreateEnvironment) -> Result<()> {
        let env_name = request.id.as_str();
        let body = [CreateEnvironmentBody {
            env_name,
            cluster_id: &request.cluster_id,
            registry_id: &request.registry_id,
            chart_values: request
                .charts
                .iter()
                .map(|chart| ChartValue {
                    env_name,
                    service_name: &chart.service_name,
                    release_name: None,
                    chart_version: &chart.chart_version,
                    deploy_strategy: DEPLOY_STRATEGY,
                })
                .collect(),
            namespace: env_name,
            is_existed: false,
            share_env: ShareEnv {
                enable: true,
                is_base: false,
                base_env: &request.base_environment,
            },
        }];

        let url = self.environments_url();
        let query = [("type", "helm"), ("projectName", self.project.as_str())];
        self.execute(
            || self.client.post(&url).query(&query).json(&body),
            Retry::Never,
            "create environment",
        )
        .await?;
        tracing::info!(environment = %request.id, charts = request.charts.len(), "environment creation accepted");
        Ok(())
    }

    async fn add_service(&self, id: &EnvironmentId, chart: &ChartSelection) -> Result<()> {
        let body = AddServiceBody {
            replace_policy: REPLACE_POLICY,
            env_names: vec![id.as_str()],
            chart_values: vec![ChartValue {
                env_name: id.as_str(),
                service_name: &chart.service_name,
                release_name: Some(&chart.service_name),
                chart_version: &chart.chart_version,
                deploy_strategy: DEPLOY_STRATEGY,
            }],
        };

        let url = self.environments_url();
        let query = [("type", "helm"), ("projectName", self.project.as_str())];
        let response = self
            .execute(
                || self.client.put(&url).query(&query).json(&body),
                Retry::Never,
                "add service",
            )
            .await?;

        // The platform answers with one entry per environment; anything else is ignored.
        let results: Vec<AddServiceResult> = response.json().await.unwrap_or_default();
        if let Some(failed) = results.iter().find(|r| !r.err_message.is_empty()) {
            return Err(Error::remote(format!(
                "add service {} to {} failed: {}",
                chart.service_name, failed.env_name, failed.err_message
            )));
        }
        Ok(())
    }

    async fn submit_workflow_task(&self, spec: &WorkflowTaskSpec) -> Result<TaskRef> {
        let body = WorkflowTaskBody::new(&self.project, spec);
        let url = self.url("api/aslan/workflow/v4/workflowtask");
        let query = [("projectName", self.project.as_str())];
        let response = self
            .execute(
                || self.client.post(&url).query(&query).json(&body),
                Retry::Never,
                "submit workflow task",
            )
            .await?;
        decode(response, "submit workflow task").await
    }

    async fn task_detail(&self, workflow_key: &str, task_id: u64) -> Result<TaskDetail> {
        let task_id = task_id.to_string();
        self.get_json(
            "openapi/workflows/custom/task",
            &[("workflowKey", workflow_key), ("taskId", task_id.as_str())],
            "task detail",
        )
        .await
    }
}
