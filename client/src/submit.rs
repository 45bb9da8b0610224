use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use common::blob::input_key;
use common::fleet::ACTIVE_STATES;
use common::job::TERMINATE_MESSAGE;
use common::{
    BlobStore, FleetProvisioner, Instance, InstanceId, JobRequest, MessageQueue, QueueAddr, Role,
    ServiceError, MANAGER_TASK_QUEUE_NAME,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

// pausa tras un fallo transitorio del broker mientras se espera el aviso
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Cola privada donde el coordinador avisa que el reporte está listo.
pub fn reply_queue_name(submission_id: &str) -> String {
    format!("LocalAppQueue-{}", submission_id)
}

pub struct Submitter {
    queues: Arc<dyn MessageQueue>,
    blobs: Arc<dyn BlobStore>,
    fleet: Arc<dyn FleetProvisioner>,
    poll_wait: Duration,
    retry_delay: Duration,
}

impl Submitter {
    pub fn new(
        queues: Arc<dyn MessageQueue>,
        blobs: Arc<dyn BlobStore>,
        fleet: Arc<dyn FleetProvisioner>,
        poll_wait: Duration,
    ) -> Self {
        Self {
            queues,
            blobs,
            fleet,
            poll_wait,
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Sube la entrada, pide el job, espera el reporte y lo guarda en
    /// `output`. Devuelve la clave del reporte.
    pub async fn submit(
        &self,
        input: &Path,
        output: &Path,
        n: u32,
        terminate: bool,
    ) -> Result<String> {
        if n == 0 {
            bail!("n tiene que ser mayor que 0");
        }
        let data = tokio::fs::read(input)
            .await
            .with_context(|| format!("leyendo {}", input.display()))?;

        let submission_id = Uuid::new_v4().to_string();
        let file_name = input
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("input.txt");
        let key = input_key(&submission_id, file_name);
        self.blobs
            .put(&key, data)
            .await
            .with_context(|| format!("subiendo {}", key))?;
        info!("entrada subida a {}", key);

        self.ensure_coordinator().await?;

        let reply = self
            .queues
            .create_queue(&reply_queue_name(&submission_id))
            .await
            .context("creando cola de respuesta")?;

        let result = self.exchange(&key, n, &reply, output, terminate).await;

        // la cola de respuesta es sólo de este submitter
        if let Err(e) = self.queues.delete_queue(&reply).await {
            warn!("no se pudo borrar la cola {}: {}", reply, e);
        }
        result
    }

    async fn exchange(
        &self,
        key: &str,
        n: u32,
        reply: &QueueAddr,
        output: &Path,
        terminate: bool,
    ) -> Result<String> {
        let intake = self.intake().await?;
        let request = JobRequest {
            input_key: key.to_string(),
            concurrency_hint: n,
            reply_address: reply.clone(),
        };
        self.queues
            .send(&intake, &request.to_message())
            .await
            .context("mandando el pedido del job")?;
        info!("pedido enviado, esperando el reporte en {}", reply);

        let notice = loop {
            match self.queues.receive(reply, 1, self.poll_wait).await {
                Ok(messages) => {
                    if let Some(m) = messages.into_iter().next() {
                        break m;
                    }
                    debug!("todavía sin reporte");
                }
                // sin cola de respuesta el aviso no puede llegar nunca
                Err(e @ ServiceError::NotFound(_)) => {
                    return Err(e).with_context(|| format!("esperando el reporte en {}", reply));
                }
                Err(e) => {
                    warn!("fallo esperando el reporte, reintento: {}", e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        };

        let report_key = notice.body.trim().to_string();
        let report = self
            .blobs
            .get(&report_key)
            .await
            .with_context(|| format!("bajando reporte {}", report_key))?;
        tokio::fs::write(output, report)
            .await
            .with_context(|| format!("escribiendo {}", output.display()))?;
        info!("reporte {} guardado en {}", report_key, output.display());

        if let Err(e) = self.queues.delete_message(reply, &notice.receipt).await {
            warn!("no se pudo borrar el aviso: {}", e);
        }

        if terminate {
            self.queues
                .send(&intake, TERMINATE_MESSAGE)
                .await
                .context("mandando el pedido de apagado")?;
            info!("apagado pedido");
        }
        Ok(report_key)
    }

    /// Lanza un coordinador si no hay ninguno running o pending.
    /// Devuelve el id lanzado, o `None` si ya había uno.
    pub async fn ensure_coordinator(&self) -> Result<Option<InstanceId>> {
        let managers = self
            .fleet
            .describe(Role::Manager, &ACTIVE_STATES)
            .await
            .context("listando coordinadores")?;
        if let Some(existing) = managers.first() {
            debug!("coordinador {} ya corriendo", existing.id);
            return Ok(None);
        }

        let launched = self
            .fleet
            .launch(Role::Manager, 1)
            .await
            .context("lanzando coordinador")?;
        info!("coordinador lanzado: {:?}", launched);
        Ok(launched.into_iter().next())
    }

    pub async fn terminate(&self) -> Result<()> {
        let intake = self.intake().await?;
        self.queues
            .send(&intake, TERMINATE_MESSAGE)
            .await
            .context("mandando el pedido de apagado")
    }

    /// Instancias vivas de ambos roles.
    pub async fn inventory(&self) -> Result<Vec<Instance>> {
        let mut all = Vec::new();
        for role in [Role::Manager, Role::Worker] {
            all.extend(
                self.fleet
                    .describe(role, &ACTIVE_STATES)
                    .await
                    .with_context(|| format!("listando instancias {}", role))?,
            );
        }
        Ok(all)
    }

    async fn intake(&self) -> Result<QueueAddr> {
        self.queues
            .create_queue(MANAGER_TASK_QUEUE_NAME)
            .await
            .context("creando la cola de pedidos")
    }
}
