use std::time::Duration;

use anyhow::{Context, Result};
use common::blob::report_key;
use common::{Message, ResultMessage, ServiceError};
use tracing::{debug, info, warn};

use crate::pool::MessagePool;
use crate::registry::{Job, RecordOutcome};
use crate::report::render_report;
use crate::state::AppState;

const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Loop de fan-in: lee resultados en lotes y los procesa en el pool.
/// Termina cuando el coordinador está drenando, la entrada ya cerró y no
/// queda ningún job en el registro.
pub async fn run_result_listener(state: AppState) {
    let pool = MessagePool::new("resultados", state.config.pool_size);
    info!("escuchando resultados en {}", state.addrs.results);

    loop {
        if state.sequencer.ready_to_terminate() && state.registry.is_empty() {
            // un finalizador en vuelo puede devolver su job si falla
            pool.wait_idle().await;
            if state.registry.is_empty() {
                break;
            }
        }

        let messages = match state
            .queues
            .receive(
                &state.addrs.results,
                state.config.result_batch_size,
                state.config.poll_wait,
            )
            .await
        {
            Ok(m) => m,
            Err(e) => {
                warn!("error leyendo resultados: {}", e);
                tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                continue;
            }
        };

        for message in messages {
            let state = state.clone();
            pool.spawn(async move {
                process_result_message(&state, message).await;
            })
            .await;
        }
    }

    info!("listener de resultados terminado");
}

/// Procesa un mensaje y lo borra de la cola sólo si no hubo error.
pub async fn process_result_message(state: &AppState, message: Message) {
    match handle_result(state, &message.body).await {
        Ok(()) => state.ack(&state.addrs.results, &message).await,
        Err(e) => warn!("resultado queda sin ack para reintento: {:#}", e),
    }
}

/// `Ok` significa que el mensaje se puede borrar (aunque se haya descartado).
pub async fn handle_result(state: &AppState, body: &str) -> Result<()> {
    let fragment = match ResultMessage::parse(body) {
        Ok(f) => f,
        Err(e) => {
            warn!("resultado mal formado descartado ({}): {:?}", e, body);
            return Ok(());
        }
    };
    let job_id = fragment.job_id.clone();
    let index = fragment.index;
    if fragment.outcome.is_error() {
        debug!("job {}: tarea {} volvió con error ({})", job_id, index, fragment.outcome);
    }

    match state.registry.record_result(fragment) {
        RecordOutcome::Recorded { completed, total } => {
            debug!("job {}: {}/{} tareas", job_id, completed, total);
        }
        RecordOutcome::Completed | RecordOutcome::AlreadyCompleted => {
            finish_job(state, &job_id).await?;
        }
        RecordOutcome::Duplicate => {
            warn!("resultado duplicado para job {} (tarea {}), descartado", job_id, index);
        }
        RecordOutcome::OutOfRange => {
            warn!("tarea {} fuera de rango para job {}, descartada", index, job_id);
        }
        RecordOutcome::UnknownJob => {
            warn!("resultado para job desconocido {} (tarea {})", job_id, index);
        }
    }
    Ok(())
}

/// Reclama un job completo y publica su reporte. Devuelve `false` si otro
/// llamador ya lo había reclamado. Si la publicación falla el job vuelve al
/// registro y el error se propaga para no hacer ack.
pub async fn finish_job(state: &AppState, job_id: &str) -> Result<bool> {
    let Some(job) = state.registry.finalize(job_id) else {
        debug!("job {} ya finalizado por otro handler", job_id);
        return Ok(false);
    };

    match publish_report(state, &job).await {
        Ok(key) => {
            let elapsed = chrono::Utc::now() - job.created_at;
            info!(
                "job {} terminado: {} tareas en {}s, reporte en {}",
                job.id,
                job.total_tasks,
                elapsed.num_seconds(),
                key
            );
            Ok(true)
        }
        Err(e) => {
            state.registry.restore(job);
            Err(e)
        }
    }
}

/// Escribe el reporte y avisa al submitter. La clave es fija por job, así
/// que repetir la escritura es idempotente.
async fn publish_report(state: &AppState, job: &Job) -> Result<String> {
    let key = report_key(&job.id);
    let html = render_report(job);

    state
        .blobs
        .put(&key, html.into_bytes())
        .await
        .with_context(|| format!("subiendo reporte {}", key))?;

    match state.queues.send(&job.reply_address, &key).await {
        Ok(()) => Ok(key),
        // el submitter ya no escucha: reintentar no cambia nada
        Err(ServiceError::NotFound(_)) => {
            warn!(
                "cola de respuesta {} ya no existe, job {} queda sin aviso",
                job.reply_address, job.id
            );
            Ok(key)
        }
        Err(e) => Err(e).with_context(|| format!("avisando a {}", job.reply_address)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{harness, Harness};
    use async_trait::async_trait;
    use common::{AnalysisKind, BlobStore, MessageQueue, Outcome, QueueAddr, ServiceResult};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn result_body(job_id: &str, index: u32, kind: &str, url: &str, out: &str) -> String {
        ResultMessage {
            job_id: job_id.to_string(),
            locator: url.to_string(),
            outcome: Outcome::Output(out.to_string()),
            kind: AnalysisKind::parse(kind).unwrap(),
            index,
        }
        .to_message()
    }

    async fn reply_queue(h: &Harness) -> QueueAddr {
        h.queues.create_queue("LocalAppQueue-test").await.unwrap()
    }

    #[tokio::test]
    async fn job_se_publica_una_vez_al_llegar_el_ultimo_resultado() {
        let h = harness().await;
        let reply = reply_queue(&h).await;
        let id = h.state.registry.create_job(reply.clone(), 2);

        handle_result(&h.state, &result_body(&id, 1, "DEP", "urlB", "out2"))
            .await
            .unwrap();
        assert!(h.blobs.keys().is_empty());

        handle_result(&h.state, &result_body(&id, 0, "POS", "urlA", "out1"))
            .await
            .unwrap();

        let key = report_key(&id);
        let report = h.blobs.get_text(&key).unwrap();
        assert!(report.contains("<p>POS: urlA out1</p>"));
        assert!(report.contains("<p>DEP: urlB out2</p>"));

        let notices = h.queues.receive(&reply, 10, Duration::ZERO).await.unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].body, key);
        assert!(h.state.registry.is_empty());

        // reentrega tardía: se descarta sin volver a avisar
        handle_result(&h.state, &result_body(&id, 0, "POS", "urlA", "out1"))
            .await
            .unwrap();
        assert_eq!(h.queues.depth(&reply), 1);
    }

    #[tokio::test]
    async fn resultado_mal_formado_o_de_job_desconocido_se_descarta() {
        let h = harness().await;
        handle_result(&h.state, "basura").await.unwrap();
        handle_result(&h.state, &result_body("nadie", 0, "POS", "u", "o"))
            .await
            .unwrap();
        assert!(h.state.registry.is_empty());
    }

    #[tokio::test]
    async fn mensaje_procesado_se_borra_de_la_cola() {
        let h = harness().await;
        let reply = reply_queue(&h).await;
        let id = h.state.registry.create_job(reply, 2);

        h.queues
            .send(&h.state.addrs.results, &result_body(&id, 0, "POS", "u", "o"))
            .await
            .unwrap();
        let msg = h
            .queues
            .receive(&h.state.addrs.results, 1, Duration::ZERO)
            .await
            .unwrap()
            .remove(0);

        process_result_message(&h.state, msg).await;
        assert_eq!(h.queues.depth(&h.state.addrs.results), 0);
    }

    /// Blob store que falla mientras `broken` esté activo.
    struct FlakyBlobs {
        inner: Arc<common::memory::MemoryBlobs>,
        broken: AtomicBool,
    }

    #[async_trait]
    impl BlobStore for FlakyBlobs {
        async fn put(&self, key: &str, data: Vec<u8>) -> ServiceResult<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(ServiceError::Other("blob store caído".into()));
            }
            self.inner.put(key, data).await
        }

        async fn get(&self, key: &str) -> ServiceResult<Vec<u8>> {
            self.inner.get(key).await
        }
    }

    #[tokio::test]
    async fn fallo_al_publicar_deja_el_mensaje_y_la_reentrega_reintenta() {
        let mut h = harness().await;
        let flaky = Arc::new(FlakyBlobs {
            inner: h.blobs.clone(),
            broken: AtomicBool::new(true),
        });
        h.state.blobs = flaky.clone() as Arc<dyn BlobStore>;

        let reply = reply_queue(&h).await;
        let id = h.state.registry.create_job(reply.clone(), 1);
        let body = result_body(&id, 0, "POS", "u", "o");

        h.queues.send(&h.state.addrs.results, &body).await.unwrap();
        let msg = h
            .queues
            .receive(&h.state.addrs.results, 1, Duration::ZERO)
            .await
            .unwrap()
            .remove(0);
        process_result_message(&h.state, msg).await;

        // sin ack, el job sigue registrado y nadie fue avisado
        assert_eq!(h.queues.depth(&h.state.addrs.results), 1);
        assert_eq!(h.state.registry.len(), 1);
        assert!(h.queues.receive(&reply, 1, Duration::ZERO).await.unwrap().is_empty());

        flaky.broken.store(false, Ordering::SeqCst);
        let again = h
            .queues
            .receive(&h.state.addrs.results, 1, Duration::from_secs(2))
            .await
            .unwrap()
            .remove(0);
        process_result_message(&h.state, again).await;

        assert!(h.state.registry.is_empty());
        assert_eq!(h.queues.depth(&h.state.addrs.results), 0);
        let notices = h.queues.receive(&reply, 10, Duration::ZERO).await.unwrap();
        assert_eq!(notices.len(), 1);
    }

    #[tokio::test]
    async fn cola_de_respuesta_borrada_no_frena_el_job() {
        let h = harness().await;
        let reply = reply_queue(&h).await;
        let id = h.state.registry.create_job(reply.clone(), 1);
        h.queues.delete_queue(&reply).await.unwrap();

        h.queues
            .send(&h.state.addrs.results, &result_body(&id, 0, "POS", "u", "o"))
            .await
            .unwrap();
        let msg = h
            .queues
            .receive(&h.state.addrs.results, 1, Duration::ZERO)
            .await
            .unwrap()
            .remove(0);
        process_result_message(&h.state, msg).await;

        // el job se da por publicado y el resultado se borra
        assert!(h.state.registry.is_empty());
        assert_eq!(h.queues.depth(&h.state.addrs.results), 0);
        assert!(h.blobs.get_text(&report_key(&id)).is_some());
    }

    #[tokio::test]
    async fn resultados_concurrentes_finalizan_una_sola_vez() {
        let h = harness().await;
        let reply = reply_queue(&h).await;
        let total = 40;
        let id = h.state.registry.create_job(reply.clone(), total);

        let mut handles = Vec::new();
        for i in 0..total {
            // cada resultado llega dos veces
            for _ in 0..2 {
                let state = h.state.clone();
                let body = result_body(&id, i, "POS", &format!("u{}", i), "o");
                handles.push(tokio::spawn(async move {
                    handle_result(&state, &body).await.unwrap();
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let notices = h.queues.receive(&reply, 10, Duration::ZERO).await.unwrap();
        assert_eq!(notices.len(), 1);
        let report = h.blobs.get_text(&report_key(&id)).unwrap();
        assert_eq!(report.matches("<p>").count(), total as usize);
    }
}
