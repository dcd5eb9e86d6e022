//! `subenv-api` binary entrypoint.
//!
//! Loads configuration from environment variables (overridable by flags),
//! wires the engine and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use subenv_api::chat_client::ChatNotifier;
use subenv_api::config::Config;
use subenv_api::platform_client::PlatformClient;
use subenv_api::server::Server;
use subenv_core::observability::{LogFormat, init_logging};
use subenv_core::{MappingStore, MemoryMappingStore, RedisMappingStore, ServiceNameTable};
use subenv_engine::{Engine, LogNotifier, Notifier};

/// Sub-environment allocator API server.
#[derive(Debug, Parser)]
#[command(name = "subenv-api")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP port (overrides `SUBENV_HTTP_PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Log format: `json` or `pretty` (defaults to pretty in debug mode).
    #[arg(long)]
    log_format: Option<LogFormat>,
}

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.http_port = port;
    }

    init_logging(args.log_format.unwrap_or_else(|| choose_log_format(&config)));

    let store: Arc<dyn MappingStore> = if let Some(url) = config.redis_url.as_ref() {
        tracing::info!("Using Redis mapping store");
        Arc::new(
            RedisMappingStore::connect(url.expose())
                .await
                .context("connect to Redis")?,
        )
    } else {
        if !config.debug {
            anyhow::bail!("SUBENV_REDIS_URL is required when SUBENV_DEBUG=false");
        }
        tracing::warn!("SUBENV_REDIS_URL not set; using in-memory mapping store (debug only)");
        Arc::new(MemoryMappingStore::new())
    };

    let service_names = match config.service_names_path.as_deref() {
        Some(path) => ServiceNameTable::load(path)
            .with_context(|| format!("load service names from {}", path.display()))?,
        None => ServiceNameTable::builtin().context("load built-in service names")?,
    };
    tracing::info!(services = service_names.len(), "Service name table loaded");

    let settings = config.engine_settings();

    let platform = PlatformClient::from_config(&config.platform)
        .context("SUBENV_PLATFORM_URL and SUBENV_PLATFORM_TOKEN are required")?
        .with_base_environment(settings.environment.base_environment.clone());

    let notifier: Arc<dyn Notifier> = if let Some(chat) = ChatNotifier::from_config(&config.chat)
    {
        Arc::new(chat)
    } else {
        tracing::warn!("chat credentials not set; notifications are only logged");
        Arc::new(LogNotifier)
    };

    let engine = Engine::new(
        store,
        Arc::new(platform),
        notifier,
        service_names,
        settings,
    );

    let server = Server::new(config, engine);
    server.serve().await?;
    Ok(())
}
