//! Price gateway entry point.

use anyhow::{Context, Result};
use external_services::QuoteApiClient;
use metrics_exporter_prometheus::PrometheusBuilder;
use price_gateway::{
    create_router, AppState, GatewayConfig, JwtVerifier, StreamingEngine, TokenValidationCache,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting price gateway");

    let config = GatewayConfig::from_env()?;
    config.log();

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .context("failed to start Prometheus exporter")?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    let shutdown = CancellationToken::new();

    let quotes = QuoteApiClient::with_base_url(&config.quote_api_url);
    let engine = Arc::new(StreamingEngine::with_shutdown(
        Arc::new(quotes),
        config.engine.clone(),
        shutdown.clone(),
    ));

    let verifier = JwtVerifier::new(config.jwt_secret.as_bytes(), config.jwt_issuer.as_deref());
    let auth = Arc::new(TokenValidationCache::new(
        Arc::new(verifier),
        config.token_cache.clone(),
    ));
    let sweeper = auth.spawn_sweeper(shutdown.clone());

    let state = Arc::new(AppState {
        engine: engine.clone(),
        auth,
        session_buffer: config.session_buffer,
    });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Price gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down feeds and token sweeper...");
    engine.shutdown();
    if let Err(e) = sweeper.await {
        error!("Token sweeper task failed: {:?}", e);
    }

    info!("Price gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
