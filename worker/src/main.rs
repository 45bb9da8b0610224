mod analyzer;
mod config;
mod worker;

use std::sync::Arc;

use anyhow::Result;
use common::remote::BrokerClient;
use reqwest::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::analyzer::{HttpAnalyzer, HttpFetcher};
use crate::config::Config;
use crate::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("worker=debug,reqwest=info")),
        )
        .init();

    let config = Config::from_env();

    // nombre de host, sólo para los logs
    let name = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let http = Client::new();
    let broker = Arc::new(BrokerClient::new(config.broker_url.clone()));
    let worker = Worker::connect(
        name,
        broker.clone(),
        broker,
        Arc::new(HttpFetcher::new(http.clone())),
        Arc::new(HttpAnalyzer::new(http, config.analyzer_url.clone())),
        config.task_budget,
    )
    .await?;
    info!(
        "worker listo contra {} (analizador {})",
        config.broker_url, config.analyzer_url
    );

    Arc::new(worker).run(config.concurrency, config.poll_wait).await;
    Ok(())
}
