use anyhow::{Context, Result};
use common::task::parse_directives;
use common::{JobId, JobRequest, TaskMessage};
use tracing::{info, warn};

use crate::aggregator::finish_job;
use crate::state::AppState;

/// Lo que quedó de partir un pedido en tareas.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub job_id: JobId,
    pub total_tasks: u32,
    /// Líneas mal formadas que no se despacharon
    pub skipped: usize,
}

/// Baja la entrada, registra el job con su total ya fijo, manda una tarea
/// por directiva y después pide capacidad al autoscaler.
///
/// Si algo falla antes de terminar el fan-out el job se descarta y se
/// devuelve el error, para que el pedido quede sin ack y se reintente entero.
pub async fn split_and_dispatch(state: &AppState, request: &JobRequest) -> Result<Dispatch> {
    let raw = state
        .blobs
        .get(&request.input_key)
        .await
        .with_context(|| format!("bajando entrada {}", request.input_key))?;
    let parsed = parse_directives(&String::from_utf8_lossy(&raw));

    let total_tasks = parsed.directives.len() as u32;
    let job_id = state
        .registry
        .create_job(request.reply_address.clone(), total_tasks);

    if parsed.skipped > 0 {
        warn!(
            "job {}: {} líneas mal formadas descartadas de {}",
            job_id, parsed.skipped, request.input_key
        );
    }
    info!(
        "job {} creado: {} tareas (n={}) desde {}",
        job_id, total_tasks, request.concurrency_hint, request.input_key
    );

    if total_tasks == 0 {
        // nunca va a llegar un resultado: se publica el reporte vacío ya
        if let Err(e) = finish_job(state, &job_id).await {
            state.registry.abandon(&job_id);
            return Err(e);
        }
        return Ok(Dispatch {
            job_id,
            total_tasks,
            skipped: parsed.skipped,
        });
    }

    for (index, directive) in parsed.directives.iter().enumerate() {
        let task = TaskMessage::new(&job_id, index as u32, directive);
        if let Err(e) = state.queues.send(&state.addrs.tasks, &task.to_message()).await {
            state.registry.abandon(&job_id);
            return Err(e).with_context(|| {
                format!("enviando tarea {} del job {}, job descartado", index, job_id)
            });
        }
    }

    // un fallo al escalar no frena el job: la capacidad actual lo drena igual
    if let Err(e) = state
        .autoscaler
        .ensure_capacity(total_tasks, request.concurrency_hint)
        .await
    {
        warn!("job {}: no se pudo escalar la flota: {:#}", job_id, e);
    }

    Ok(Dispatch {
        job_id,
        total_tasks,
        skipped: parsed.skipped,
    })
}
