use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use entropy_service::config::{ServiceConfig, DRBG_ALGO_TAG};
use entropy_service::rng::{reseed_loop, Drbg, DrbgMetadata, EntropyReservoir};
use entropy_service::server::{self, AppState};

/// In-flight requests get this long to finish once shutdown starts.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        device = %config.device.display(),
        capacity = config.capacity,
        "starting entropy service"
    );

    let reservoir = EntropyReservoir::new(&config.device, config.capacity, config.fill_delay);

    // Blocks until the device has produced the initial seed material; a
    // service that cannot seed its master DRBG must not come up.
    let seed = {
        let source = Arc::clone(&reservoir);
        let reseed_bytes = config.reseed_bytes;
        tokio::task::spawn_blocking(move || source.get(reseed_bytes))
            .await
            .context("initial seed task failed")?
            .context("initial seed draw failed")?
    };

    let master = Arc::new(Drbg::new(&seed).context("master DRBG construction failed")?);
    master.set_metadata(DrbgMetadata {
        version: env!("CARGO_PKG_VERSION").to_string(),
        source: config.source.clone(),
        algo: DRBG_ALGO_TAG.to_string(),
        reseed_interval: config.reseed_interval,
        reseed_size_bits: config.reseed_bytes * 8,
        reservoir: Arc::downgrade(&reservoir),
    });
    info!(
        reseed_interval = %humantime::format_duration(config.reseed_interval),
        reseed_bits = config.reseed_bytes * 8,
        "master DRBG seeded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = tokio::spawn(reseed_loop(
        Arc::clone(&master),
        Arc::clone(&reservoir),
        config.reseed_interval,
        config.reseed_bytes,
        shutdown_rx.clone(),
    ));

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(addr = %config.listen, "HTTP server listening");

    let state = AppState {
        master: Arc::clone(&master),
        reservoir: Arc::clone(&reservoir),
    };
    let http_server = tokio::spawn(server::serve(listener, state, shutdown_rx));

    shutdown_signal().await;
    info!("shutdown signal received");

    // Cascade: stop accepting and drain HTTP, then halt the producer and
    // the reseed scheduler.
    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(DRAIN_DEADLINE, http_server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!(error = %err, "HTTP server error during shutdown"),
        Ok(Err(err)) => warn!(error = %err, "HTTP server task failed"),
        Err(_) => warn!("drain deadline exceeded, abandoning in-flight requests"),
    }

    reservoir.stop();
    let _ = tokio::time::timeout(Duration::from_secs(1), scheduler).await;

    info!("shutdown complete");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable, falling back to Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
