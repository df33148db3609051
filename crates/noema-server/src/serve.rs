use crate::config::NoemaConfig;
use crate::http::{create_router, AppState};
use anyhow::Context;
use noema_core::Engine;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Run the HTTP server and background loops until ctrl-c.
pub async fn run(config: NoemaConfig) -> anyhow::Result<()> {
    let problems = config.validate();
    if !problems.is_empty() {
        anyhow::bail!("Invalid configuration:\n  {}", problems.join("\n  "));
    }

    info!("Starting noema v{}", env!("CARGO_PKG_VERSION"));
    info!("HTTP: {}", config.server.http_addr);
    info!("Data: {}", config.data_dir().display());

    let engine = Arc::new(Engine::open(config.engine_config()).await?);
    let stats = engine.stats()?;
    info!(
        "Store loaded: {} facts ({} active), {} pending events, rules {} ({} rules)",
        stats.store.fact_count,
        stats.store.active_facts,
        stats.store.pending_events,
        stats.rules_version,
        stats.rule_count
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = engine.spawn_background(shutdown_rx);
    info!("{} background task(s) started", background.len());

    let app = create_router(AppState::new(engine.clone()));
    let listener = tokio::net::TcpListener::bind(config.server.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.http_addr))?;
    info!("HTTP server listening on {}", config.server.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;

    if let Err(e) = shutdown_tx.send(true) {
        debug!("No background task was listening for shutdown: {}", e);
    }
    for handle in background {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    if !engine.config().store.in_memory {
        match engine.snapshot() {
            Ok(handle) => info!("Final snapshot {}", handle.id),
            Err(e) => warn!("Final snapshot failed: {}", e),
        }
    }
    info!("Shutdown complete");
    Ok(())
}
