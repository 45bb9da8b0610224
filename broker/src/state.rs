use std::sync::Arc;

use common::memory::MemoryQueues;
use common::{BlobStore, FleetProvisioner, QueueAddr};

use crate::blobs::FsBlobStore;
use crate::config::Config;
use crate::fleet::LocalFleet;

#[derive(Clone)]
pub struct BrokerState {
    pub queues: Arc<MemoryQueues>,
    pub blobs: Arc<dyn BlobStore>,
    pub fleet: Arc<dyn FleetProvisioner>,
    // base de las direcciones de cola que ven los clientes
    pub public_url: String,
}

impl BrokerState {
    pub fn new(config: &Config) -> Self {
        Self {
            queues: Arc::new(MemoryQueues::new(config.visibility)),
            blobs: Arc::new(FsBlobStore::new(config.data_dir.clone())),
            fleet: Arc::new(LocalFleet::new(
                config.worker_cmd.clone(),
                config.manager_cmd.clone(),
                config.public_url.clone(),
            )),
            public_url: config.public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Dirección pública de una cola: la URL de su recurso en la API.
    pub fn public_addr(&self, name: &str) -> QueueAddr {
        QueueAddr::new(format!("{}/api/v1/queues/{}", self.public_url, name))
    }
}
