// coordinator/src/state.rs

use std::sync::Arc;

use anyhow::{Context, Result};
use common::{
    BlobStore, FleetProvisioner, Message, MessageQueue, QueueAddr, MANAGER_TASK_QUEUE_NAME,
    WORKER_RESULT_QUEUE_NAME, WORKER_TASK_QUEUE_NAME,
};
use tracing::{info, warn};

use crate::autoscale::Autoscaler;
use crate::config::Config;
use crate::registry::{InMemoryJobRegistry, JobRegistry};
use crate::shutdown::ShutdownSequencer;

/// Direcciones de las colas que usa el coordinador.
#[derive(Debug, Clone)]
pub struct QueueAddrs {
    // pedidos de jobs y centinela de apagado
    pub intake: QueueAddr,
    pub tasks: QueueAddr,
    pub results: QueueAddr,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub queues: Arc<dyn MessageQueue>,
    pub blobs: Arc<dyn BlobStore>,
    pub fleet: Arc<dyn FleetProvisioner>,
    pub registry: Arc<dyn JobRegistry>,
    pub autoscaler: Arc<Autoscaler>,
    pub sequencer: Arc<ShutdownSequencer>,
    pub addrs: QueueAddrs,
}

impl AppState {
    /// Crea (o encuentra) las colas compartidas y arma el estado.
    /// Si no hay servicio de colas, el coordinador no puede arrancar.
    pub async fn connect(
        config: Config,
        queues: Arc<dyn MessageQueue>,
        blobs: Arc<dyn BlobStore>,
        fleet: Arc<dyn FleetProvisioner>,
    ) -> Result<Self> {
        let mut addrs = Vec::new();
        for name in [
            MANAGER_TASK_QUEUE_NAME,
            WORKER_TASK_QUEUE_NAME,
            WORKER_RESULT_QUEUE_NAME,
        ] {
            let addr = queues
                .create_queue(name)
                .await
                .with_context(|| format!("creando cola {}", name))?;
            info!("cola {} en {}", name, addr);
            addrs.push(addr);
        }
        let results = addrs.pop().context("faltan colas")?;
        let tasks = addrs.pop().context("faltan colas")?;
        let intake = addrs.pop().context("faltan colas")?;

        let autoscaler = Arc::new(Autoscaler::new(fleet.clone(), config.max_workers));

        Ok(Self {
            config: Arc::new(config),
            queues,
            blobs,
            fleet,
            registry: Arc::new(InMemoryJobRegistry::new()),
            autoscaler,
            sequencer: Arc::new(ShutdownSequencer::new()),
            addrs: QueueAddrs {
                intake,
                tasks,
                results,
            },
        })
    }

    /// Borra un mensaje ya procesado. Si falla, la cola lo va a reentregar
    /// y el reproceso lo descarta como duplicado.
    pub async fn ack(&self, queue: &QueueAddr, message: &Message) {
        if let Err(e) = self.queues.delete_message(queue, &message.receipt).await {
            warn!("no se pudo borrar mensaje de {}: {}", queue, e);
        }
    }
}
