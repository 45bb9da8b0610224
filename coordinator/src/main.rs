mod aggregator;
mod autoscale;
mod config;
mod fanout;
mod intake;
mod pool;
mod registry;
mod report;
mod shutdown;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use common::remote::BrokerClient;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::shutdown::TeardownReport;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("coordinator=debug")),
        )
        .init();

    let config = Config::from_env();
    info!(
        "coordinador iniciado contra {} (max_workers={}, pool={})",
        config.broker_url, config.max_workers, config.pool_size
    );

    let broker = Arc::new(
        BrokerClient::new(config.broker_url.clone())
            .with_metadata(config.instance_id.clone(), config.metadata_url.clone()),
    );

    // sin colas no hay nada que hacer: este error sí es fatal
    let state = AppState::connect(config, broker.clone(), broker.clone(), broker)
        .await
        .context("no se pudo inicializar el coordinador")?;

    let report = run(state).await?;
    info!(
        "coordinador detenido: {} workers terminados, colas borradas {:?}",
        report.workers_terminated.len(),
        report.queues_deleted
    );
    Ok(())
}

/// Corre los dos listeners hasta que el apagado termina de drenar y
/// después desarma el sistema.
async fn run(state: AppState) -> Result<TeardownReport> {
    let intake = tokio::spawn(intake::run_intake_listener(state.clone()));
    let results = tokio::spawn(aggregator::run_result_listener(state.clone()));

    intake.await.context("listener de pedidos")?;
    results.await.context("listener de resultados")?;

    Ok(state
        .sequencer
        .teardown(state.fleet.as_ref(), state.queues.as_ref())
        .await)
}
