//! jtgate - JT/T 808 terminal gateway
//!
//! Accepts terminal connections, decodes their frames and runs every message
//! through the monitoring, validation, session and routing chain.

use jtgate_core::SessionRegistry;
use jtgate_protocol::BodyRegistry;
use jtgate_server::{metrics, Config, Dispatcher, Metrics, Server, ServerConfig, SessionSweeper};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Defaults, then JTGATE_CONFIG file, then env overrides
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Ok(path) = std::env::var("JTGATE_CONFIG") {
        tracing::info!("Loaded config from {}", path);
    }

    tracing::info!("Starting jtgate");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!(
        "  Sessions: timeout={}s, sweep every {}s",
        config.session.timeout_secs,
        config.session.sweep_interval_secs
    );
    tracing::info!(
        "  Validation: {}",
        if config.pipeline.strict_validation {
            "strict"
        } else {
            "lenient"
        }
    );

    let registry = Arc::new(BodyRegistry::with_defaults());
    let sessions = Arc::new(SessionRegistry::new(config.session.timeout()));

    let metrics = if config.metrics.enabled {
        Some(Arc::new(Metrics::new()?))
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let mut dispatcher = Dispatcher::new(&config.pipeline, sessions.clone())?;
    let mut server_config = ServerConfig::from_config(&config);
    let mut sweeper = SessionSweeper::new(sessions.clone(), &config.session);
    if let Some(ref metrics) = metrics {
        dispatcher = dispatcher.with_metrics(metrics.clone());
        server_config = server_config.with_metrics(metrics.clone());
        sweeper = sweeper.with_metrics(metrics.clone());
    }
    let dispatcher = Arc::new(dispatcher);
    let sweeper = Arc::new(sweeper);
    let server = Arc::new(Server::new(server_config, dispatcher.clone(), registry));

    // Spawn session sweeper
    let sweeper_handle = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move {
            sweeper.run().await;
        })
    };

    // Spawn operator endpoints
    if let Some(metrics) = metrics {
        let addr = config.metrics.bind_addr;
        let dispatcher = dispatcher.clone();
        let shutdown = server.shutdown_handle().subscribe();
        tokio::spawn(async move {
            if let Err(e) = metrics::run_metrics_server(addr, metrics, dispatcher, shutdown).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    let shutdown_sweeper = sweeper.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
        shutdown_sweeper.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    let _ = sweeper_handle.await;

    tracing::info!(
        "Server stopped ({} sessions live at exit)",
        dispatcher.sessions().len()
    );
    Ok(())
}
