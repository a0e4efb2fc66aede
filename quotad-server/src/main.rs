mod config;
mod metrics;
mod service;
mod transport;
mod types;

use std::sync::Arc;

use anyhow::Result;
use quotad::{ConfigSource, Engine, FileSource, MemoryBackend, MemorySource};
use tokio::task::JoinSet;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::service::QuotaService;
use crate::transport::{Transport, http::HttpTransport, native::NativeTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("quotad={}", config.log_level).parse()?)
                .add_directive(format!("quotad_server={}", config.log_level).parse()?),
        )
        .init();

    let source: Arc<dyn ConfigSource> = match &config.config_file {
        Some(path) => {
            tracing::info!("Reading service configuration from {}", path.display());
            Arc::new(FileSource::new(path))
        }
        None => {
            tracing::warn!(
                "No config file given; starting with an empty in-memory configuration"
            );
            Arc::new(MemorySource::new())
        }
    };

    let engine = Arc::new(Engine::new(
        Arc::new(MemoryBackend::new()),
        source,
        config.reaper.to_reaper_config(),
        config.event_buffer_size,
    ));
    engine.set_listener(|event| tracing::debug!(?event, "service event"));
    engine
        .start()
        .map_err(|e| anyhow::anyhow!("Failed to load initial configuration: {e}"))?;

    let service = QuotaService::new(Arc::clone(&engine), Arc::new(Metrics::new()));

    // Create a set to manage multiple transport tasks
    let mut transport_tasks = JoinSet::new();

    if let Some(http_config) = &config.transports.http {
        let service = service.clone();
        let host = http_config.host.clone();
        let port = http_config.port;

        transport_tasks.spawn(async move {
            tracing::info!("Starting HTTP transport on {}:{}", host, port);
            let transport = HttpTransport::new(&host, port);
            transport.start(service).await
        });
    }

    if let Some(native_config) = &config.transports.native {
        let service = service.clone();
        let host = native_config.host.clone();
        let port = native_config.port;

        transport_tasks.spawn(async move {
            tracing::info!("Starting Native transport on {}:{}", host, port);
            let transport = NativeTransport::new(&host, port);
            transport.start(service).await
        });
    }

    tracing::info!(
        "quotad server started at configuration version {}",
        engine.current_version()
    );

    // Wait for all transport tasks to complete (they run indefinitely)
    while let Some(result) = transport_tasks.join_next().await {
        match result {
            Ok(Ok(())) => {
                tracing::info!("Transport task completed successfully");
            }
            Ok(Err(e)) => {
                tracing::error!("Transport task failed: {}", e);
                engine.stop();
                return Err(e);
            }
            Err(e) => {
                tracing::error!("Transport task panicked: {}", e);
                engine.stop();
                return Err(anyhow::anyhow!("Transport task panicked"));
            }
        }
    }

    engine.stop();
    Ok(())
}
