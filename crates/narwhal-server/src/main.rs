use anyhow::Context;
use narwhal_server::{create_app, AppState, ServerConfig};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,narwhal_server=debug,narwhal_engine=debug")),
        )
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    info!(
        stop_timeout_secs = config.engine.stop_timeout.as_secs(),
        request_timeout_secs = config.engine.request_timeout.as_secs(),
        pull_timeout_secs = config.engine.pull_timeout.as_secs(),
        "Loaded configuration"
    );

    let service = narwhal_engine::connect(config.engine.clone())?;
    match service.ping().await {
        Ok(()) => info!("Container engine reachable"),
        Err(e) => warn!(error = %e, "Container engine not reachable, serving anyway"),
    }

    let app = create_app(AppState::new(service));

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    info!("Narwhal API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
