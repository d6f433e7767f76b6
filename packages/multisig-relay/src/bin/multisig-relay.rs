//! Multisig relay daemon.

use multisig_relay::{create_router, AppState, Config};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting multisig relay");

    let config = Config::load().unwrap_or_else(|e| {
        error!(error = %e, "FATAL: fix MULTISIG_* env vars or multisig-relay.toml");
        std::process::exit(1);
    });

    info!(
        account = %config.account,
        rpc = %config.rpc_url,
        fallback = %config.fallback_rpc_url,
        amount = %config.amount,
        symbol = %config.asset_symbol,
        to = %config.send_to,
        "Configuration loaded"
    );

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::new(config).unwrap_or_else(|e| {
        error!(error = %e, "FATAL: failed to initialize relay");
        std::process::exit(1);
    }));

    let cancel = CancellationToken::new();
    let scheduler = Arc::clone(&state.scheduler);
    let cancel_bg = cancel.clone();
    let loop_handle = tokio::spawn(async move {
        scheduler.run(cancel_bg).await;
    });

    let app = create_router(state.clone());

    info!(address = %bind_address, "Listening");

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Graceful shutdown: stop polling, let a running step finish ---
    info!("HTTP server stopped, waiting for in-flight dispatch...");
    cancel.cancel();
    if let Err(e) = loop_handle.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }

    let drain_deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(30);
    loop {
        if !state.scheduler.state().is_in_flight() {
            info!("No dispatch in flight");
            break;
        }
        if tokio::time::Instant::now() >= drain_deadline {
            warn!("Drain timeout, abandoning in-flight dispatch");
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    info!("Multisig relay shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
