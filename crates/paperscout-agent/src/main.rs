//! PaperScout — iterative academic paper discovery
//! Entry point for the server binary.

mod config;
mod wiring;

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("paperscout=debug,info")),
        )
        .init();

    info!("PaperScout starting up, version {}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load().map_err(|e| {
        tracing::error!("Invalid configuration: {e}");
        tracing::error!("Copy paperscout.example.toml to paperscout.toml and edit it.");
        e
    })?;
    info!(
        llm_mode = %config.llm.mode,
        embedding = ?config.embedding.backend,
        sources = ?config.sources.enabled,
        "Configuration loaded"
    );

    let state = wiring::build_state(&config)?;
    let router = paperscout_web::router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("HTTP API listening on http://{}", config.server.bind);
    info!("   Health:   /api/health");
    info!("   Sessions: /api/sessions");
    info!("   Progress: /api/events");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
