//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use subenv_core::{Error, Redacted, Result, SlotPool};
use subenv_engine::EngineSettings;
use subenv_engine::settings::ReadinessPolicy;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 6652;

/// Deployment platform connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Platform base URL (e.g. `https://zadig.example.com`).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Bearer token for the platform API.
    #[serde(default)]
    pub api_token: Option<Redacted<String>>,
    /// Project the environments live in.
    pub project: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            project: "fat-base-envrionment".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl PlatformConfig {
    /// Request timeout as a duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Chat (notification) service settings.
///
/// Notifications are only logged unless both the app id and secret are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatConfig {
    /// Open API base URL.
    pub base_url: String,
    /// Application id.
    #[serde(default)]
    pub app_id: Option<String>,
    /// Application secret.
    #[serde(default)]
    pub app_secret: Option<Redacted<String>>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://open.larksuite.com".to_string(),
            app_id: None,
            app_secret: None,
        }
    }
}

impl ChatConfig {
    /// Returns the credentials if chat delivery is configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.app_id, &self.app_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.expose().as_str())),
            _ => None,
        }
    }
}

/// API server configuration.
///
/// Secrets are wrapped in [`Redacted`] and never appear in `Debug` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Enable debug mode.
    ///
    /// When enabled:
    /// - the in-memory mapping store may be used in place of Redis
    /// - the platform connection may be left unconfigured
    /// - logs are pretty-printed
    pub debug: bool,

    /// Redis URL for the mapping store.
    #[serde(default)]
    pub redis_url: Option<Redacted<String>>,

    /// Path to a service-name table overriding the built-in one.
    #[serde(default)]
    pub service_names_path: Option<PathBuf>,

    /// Deployment platform connection.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Chat service connection.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Console base URL linked from notifications.
    #[serde(default)]
    pub console_url: String,

    /// Number of allocatable slots.
    pub pool_size: usize,

    /// Seconds between readiness polls of a new environment.
    pub readiness_interval_secs: u64,

    /// Seconds to wait for a new environment to become ready.
    pub readiness_timeout_secs: u64,

    /// Seconds to let in-flight requests finish after a shutdown signal.
    pub shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let readiness = ReadinessPolicy::default();
        Self {
            http_port: DEFAULT_HTTP_PORT,
            debug: false,
            redis_url: None,
            service_names_path: None,
            platform: PlatformConfig::default(),
            chat: ChatConfig::default(),
            console_url: String::new(),
            pool_size: SlotPool::default().size,
            readiness_interval_secs: readiness.interval.as_secs(),
            readiness_timeout_secs: readiness.timeout.as_secs(),
            shutdown_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported variables:
    /// - `SUBENV_HTTP_PORT`
    /// - `SUBENV_DEBUG`
    /// - `SUBENV_REDIS_URL`
    /// - `SUBENV_SERVICE_NAMES_PATH`
    /// - `SUBENV_PLATFORM_URL`
    /// - `SUBENV_PLATFORM_TOKEN`
    /// - `SUBENV_PLATFORM_PROJECT`
    /// - `SUBENV_PLATFORM_TIMEOUT_SECS`
    /// - `SUBENV_CHAT_URL`
    /// - `SUBENV_CHAT_APP_ID`
    /// - `SUBENV_CHAT_APP_SECRET`
    /// - `SUBENV_CONSOLE_URL`
    /// - `SUBENV_POOL_SIZE`
    /// - `SUBENV_READINESS_INTERVAL_SECS`
    /// - `SUBENV_READINESS_TIMEOUT_SECS`
    /// - `SUBENV_SHUTDOWN_TIMEOUT_SECS`
    ///
    /// # Errors
    ///
    /// Returns an error if any environment variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("SUBENV_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = env_bool("SUBENV_DEBUG")? {
            config.debug = debug;
        }

        config.redis_url = env_string("SUBENV_REDIS_URL").map(Redacted);
        config.service_names_path = env_string("SUBENV_SERVICE_NAMES_PATH").map(PathBuf::from);

        config.platform.base_url = env_string("SUBENV_PLATFORM_URL");
        config.platform.api_token = env_string("SUBENV_PLATFORM_TOKEN").map(Redacted);
        if let Some(project) = env_string("SUBENV_PLATFORM_PROJECT") {
            config.platform.project = project;
        }
        if let Some(secs) = env_u64("SUBENV_PLATFORM_TIMEOUT_SECS")? {
            config.platform.request_timeout_secs = secs;
        }

        if let Some(url) = env_string("SUBENV_CHAT_URL") {
            config.chat.base_url = url;
        }
        config.chat.app_id = env_string("SUBENV_CHAT_APP_ID");
        config.chat.app_secret = env_string("SUBENV_CHAT_APP_SECRET").map(Redacted);

        if let Some(url) = env_string("SUBENV_CONSOLE_URL") {
            config.console_url = url;
        }
        if let Some(size) = env_usize("SUBENV_POOL_SIZE")? {
            config.pool_size = size;
        }
        if let Some(secs) = env_u64("SUBENV_READINESS_INTERVAL_SECS")? {
            config.readiness_interval_secs = secs;
        }
        if let Some(secs) = env_u64("SUBENV_READINESS_TIMEOUT_SECS")? {
            config.readiness_timeout_secs = secs;
        }
        if let Some(secs) = env_u64("SUBENV_SHUTDOWN_TIMEOUT_SECS")? {
            config.shutdown_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that hold regardless of where the config came from.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::InvalidInput(
                "pool_size must be at least 1".to_string(),
            ));
        }
        if self.readiness_interval_secs == 0 {
            return Err(Error::InvalidInput(
                "readiness_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.readiness_timeout_secs < self.readiness_interval_secs {
            return Err(Error::InvalidInput(
                "readiness_timeout_secs must not be shorter than readiness_interval_secs"
                    .to_string(),
            ));
        }
        if self.chat.app_id.is_some() != self.chat.app_secret.is_some() {
            return Err(Error::InvalidInput(
                "chat app id and app secret must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds engine settings from the production defaults plus the
    /// configured overrides.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        let mut settings = EngineSettings::default();
        settings.pool.size = self.pool_size;
        settings.readiness = ReadinessPolicy {
            interval: Duration::from_secs(self.readiness_interval_secs),
            timeout: Duration::from_secs(self.readiness_timeout_secs),
        };
        settings.notifications.console_url.clone_from(&self.console_url);
        settings
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}
