use anyhow::Context;
use fly_finder::{build_router, AmadeusClient, AppState, Config, MemoryCache, PriceLookupService};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Config::from_env().context("Failed to load configuration")?;

    let cache = Arc::new(MemoryCache::new(config.cache.clone()));
    spawn_cache_sweeper(Arc::clone(&cache));

    let provider = Arc::new(
        AmadeusClient::new(config.provider.clone()).context("Failed to build provider client")?,
    );
    let prices = Arc::new(PriceLookupService::new(
        provider,
        cache,
        config.policy.token_ttl,
        config.policy.price_ttl,
    ));

    let router = build_router(AppState::new(prices));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("HTTP server listening on http://{}", config.bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server shutdown complete");
    Ok(())
}

// Periodically drops expired entries that nobody reads again
fn spawn_cache_sweeper(cache: Arc<MemoryCache>) {
    let period = Duration::from_secs(cache.config().cleanup_interval_seconds.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            cache.purge_expired();
        }
    });
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }

    info!("Shutting down gracefully...");
}
