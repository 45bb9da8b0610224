mod blobs;
mod config;
mod fleet;
mod handlers;
mod state;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::state::BrokerState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("broker=debug,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creando {}", config.data_dir.display()))?;

    let state = BrokerState::new(&config);

    // router HTTP
    let app = handlers::build_router(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("escuchando en {}", config.bind))?;
    info!(
        "broker escuchando en {} (público {}, blobs en {})",
        listener.local_addr()?,
        config.public_url,
        config.data_dir.display()
    );

    axum::serve(listener, app).await?;
    Ok(())
}
