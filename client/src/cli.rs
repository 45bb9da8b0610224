use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI del submitter: manda archivos al coordinador y baja el reporte")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sube un archivo de entrada, espera el reporte y lo guarda en OUTPUT
    Submit {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
        /// Tareas por worker
        #[arg(value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
        n: u32,
        /// Al terminar, pide el apagado del sistema
        #[arg(long)]
        terminate: bool,
    },
    /// Manda sólo el pedido de apagado
    Terminate,
    /// Lista coordinador y workers vivos
    Workers,
}
