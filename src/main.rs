use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use edge_gateway::config::LogFormat;
use edge_gateway::{AppState, Config, StartupError, build_router, metrics};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(format: LogFormat, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Run the gateway, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    let config = Config::from_env();

    // Logging needs the format from the config, so a config error is
    // reported through a default subscriber.
    let config = match config {
        Ok(config) => {
            init_tracing(config.log_format, &config.log_level);
            config
        }
        Err(e) => {
            init_tracing(LogFormat::Text, "info");
            error!("{e}");
            return Err(exitcode::CONFIG);
        }
    };

    info!("Starting edge gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.host,
        port = %config.port,
        services = config.services.len(),
        cache_enabled = config.cache_enabled,
        "Configuration loaded"
    );
    for service in &config.services {
        info!(service = %service.id, base_url = %service.base_url, "Registered backing service");
    }

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;

    let state = AppState::new(config).map_err(|e| {
        error!("Failed to initialize gateway: {e}");
        match e {
            StartupError::Upstream(_) => exitcode::UNAVAILABLE,
            StartupError::Config(_) | StartupError::RateLimit(_) => exitcode::CONFIG,
        }
    })?;

    let app = build_router(state.clone());

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Gateway listening on http://{addr}");
    for route in state.routes.iter() {
        info!(
            prefix = %route.path_prefix,
            breaker = %route.breaker_id,
            fallback = %route.fallback,
            "Route"
        );
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Gateway shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires; the other
/// one still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
