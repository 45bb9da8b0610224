mod cli;
mod submit;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use common::remote::{broker_base_url, BrokerClient};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::submit::Submitter;

const POLL_WAIT: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("client=info")),
        )
        .init();

    let cli = Cli::parse();
    let broker = Arc::new(BrokerClient::new(broker_base_url()));
    let submitter = Submitter::new(broker.clone(), broker.clone(), broker, POLL_WAIT);

    match cli.command {
        Commands::Submit {
            input,
            output,
            n,
            terminate,
        } => {
            let report_key = submitter.submit(&input, &output, n, terminate).await?;
            println!("Reporte listo:");
            println!("  clave: {}", report_key);
            println!("  guardado en: {}", output.display());
        }
        Commands::Terminate => {
            submitter.terminate().await?;
            println!("Pedido de apagado enviado");
        }
        Commands::Workers => {
            let instances = submitter.inventory().await?;
            println!("{}", serde_json::to_string_pretty(&instances)?);
        }
    }

    Ok(())
}
