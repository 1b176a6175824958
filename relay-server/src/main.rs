use relay_server::{build_router, AppState, Config};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    info!("Using Ollama model: {}", config.model);
    info!("Forwarding to: {}", config.chat_url());

    let addr = config.bind_addr;
    let shutdown = CancellationToken::new();
    let app = build_router(AppState::new(config, shutdown.clone()));

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl-C, then cancel open streams so the server can drain.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down, closing open streams");
    shutdown.cancel();
}
