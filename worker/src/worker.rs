use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use common::blob::task_output_key;
use common::{
    BlobStore, Message, MessageQueue, Outcome, QueueAddr, ResultMessage, ServiceError,
    TaskMessage, WORKER_RESULT_QUEUE_NAME, WORKER_TASK_QUEUE_NAME,
};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analyzer::{Analyzer, ResourceFetcher};

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Consumidor de tareas. Cada tarea se borra de la cola sólo después de
/// publicar su resultado.
pub struct Worker {
    name: String,
    queues: Arc<dyn MessageQueue>,
    blobs: Arc<dyn BlobStore>,
    fetcher: Arc<dyn ResourceFetcher>,
    analyzer: Arc<dyn Analyzer>,
    tasks: QueueAddr,
    results: QueueAddr,
    task_budget: Duration,
}

impl Worker {
    /// Busca las colas de tareas y resultados, esperando a que el
    /// coordinador las cree si todavía no existen.
    pub async fn connect(
        name: String,
        queues: Arc<dyn MessageQueue>,
        blobs: Arc<dyn BlobStore>,
        fetcher: Arc<dyn ResourceFetcher>,
        analyzer: Arc<dyn Analyzer>,
        task_budget: Duration,
    ) -> Result<Self> {
        let tasks = wait_for_queue(queues.as_ref(), WORKER_TASK_QUEUE_NAME).await?;
        let results = wait_for_queue(queues.as_ref(), WORKER_RESULT_QUEUE_NAME).await?;
        Ok(Self {
            name,
            queues,
            blobs,
            fetcher,
            analyzer,
            tasks,
            results,
            task_budget,
        })
    }

    /// Loop principal: con un slot libre pide una tarea y la procesa en
    /// paralelo, hasta `concurrency` a la vez. Termina cuando la cola de
    /// tareas desaparece (el coordinador se apagó).
    pub async fn run(self: Arc<Self>, concurrency: usize, poll_wait: Duration) {
        let sem = Arc::new(Semaphore::new(concurrency.max(1)));
        info!(
            "worker {} consumiendo {} (concurrency={})",
            self.name, self.tasks, concurrency
        );

        loop {
            let permit = match sem.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let messages = match self.queues.receive(&self.tasks, 1, poll_wait).await {
                Ok(m) => m,
                Err(ServiceError::NotFound(_)) => {
                    info!("la cola de tareas ya no existe, el worker {} termina", self.name);
                    break;
                }
                Err(e) => {
                    warn!("error pidiendo tareas: {}", e);
                    drop(permit);
                    sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            let Some(message) = messages.into_iter().next() else {
                drop(permit);
                continue;
            };

            let worker = self.clone();
            tokio::spawn(async move {
                worker.process_message(message).await;
                drop(permit);
            });
        }

        // esperar a las tareas en vuelo antes de salir
        if let Ok(all) = sem.acquire_many(concurrency.max(1) as u32).await {
            drop(all);
        };
    }

    pub async fn process_message(&self, message: Message) {
        let task = match TaskMessage::parse(&message.body) {
            Ok(t) => t,
            Err(e) => {
                warn!("tarea mal formada descartada ({}): {:?}", e, message.body);
                self.ack(&message).await;
                return;
            }
        };

        match tokio::time::timeout(self.task_budget, self.handle_task(&task)).await {
            Ok(Ok(())) => self.ack(&message).await,
            Ok(Err(e)) => warn!(
                "tarea {}#{} queda sin ack para reintento: {:#}",
                task.job_id, task.index, e
            ),
            Err(_) => warn!(
                "tarea {}#{} superó {:?}, queda para reentrega",
                task.job_id, task.index, self.task_budget
            ),
        }
    }

    /// Analiza y publica el resultado. Un fallo del análisis viaja como
    /// resultado de error; sólo falla si no se pudo publicar.
    async fn handle_task(&self, task: &TaskMessage) -> Result<()> {
        let outcome = match self.analyze_task(task).await {
            Ok(key) => {
                info!("tarea {}#{} lista en {}", task.job_id, task.index, key);
                Outcome::Output(key)
            }
            Err(e) => {
                warn!("tarea {}#{} falló: {:#}", task.job_id, task.index, e);
                Outcome::error(format!("{:#}", e))
            }
        };

        let result = ResultMessage {
            job_id: task.job_id.clone(),
            locator: task.locator.clone(),
            outcome,
            kind: task.kind.clone(),
            index: task.index,
        };
        self.queues
            .send(&self.results, &result.to_message())
            .await
            .with_context(|| format!("publicando resultado de {}#{}", task.job_id, task.index))
    }

    async fn analyze_task(&self, task: &TaskMessage) -> Result<String> {
        let text = self.fetcher.fetch(&task.locator).await?;
        let output = self.analyzer.analyze(&task.kind, &text).await?;

        let key = task_output_key(&task.job_id, &output_name(task));
        self.blobs
            .put(&key, output.into_bytes())
            .await
            .with_context(|| format!("subiendo {}", key))?;
        Ok(key)
    }

    async fn ack(&self, message: &Message) {
        if let Err(e) = self.queues.delete_message(&self.tasks, &message.receipt).await {
            warn!("no se pudo borrar la tarea: {}", e);
        }
    }
}

/// Nombre estable de la salida de una tarea: reprocesarla pisa el mismo objeto.
pub fn output_name(task: &TaskMessage) -> String {
    let seed = format!(
        "{}/{}/{}/{}",
        task.job_id, task.index, task.kind, task.locator
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, seed.as_bytes()).to_string()
}

async fn wait_for_queue(queues: &dyn MessageQueue, name: &str) -> Result<QueueAddr> {
    loop {
        match queues.queue_addr(name).await {
            Ok(Some(addr)) => return Ok(addr),
            Ok(None) => debug!("cola {} todavía no existe", name),
            Err(ServiceError::Transport(e)) => warn!("broker inaccesible: {}", e),
            Err(e) => return Err(e).with_context(|| format!("buscando cola {}", name)),
        }
        sleep(RETRY_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::memory::{MemoryBlobs, MemoryQueues};
    use common::{AnalysisKind, Directive};
    use std::collections::HashMap;

    struct StubFetcher(HashMap<&'static str, &'static str>);

    #[async_trait]
    impl ResourceFetcher for StubFetcher {
        async fn fetch(&self, locator: &str) -> Result<String> {
            match self.0.get(locator) {
                Some(text) => Ok(text.to_string()),
                None => anyhow::bail!("404 en {}", locator),
            }
        }
    }

    struct UpperAnalyzer {
        delay: Duration,
    }

    #[async_trait]
    impl Analyzer for UpperAnalyzer {
        async fn analyze(&self, kind: &AnalysisKind, text: &str) -> Result<String> {
            sleep(self.delay).await;
            Ok(format!("{}|{}", kind, text.to_uppercase()))
        }
    }

    struct Setup {
        worker: Arc<Worker>,
        queues: Arc<MemoryQueues>,
        blobs: Arc<MemoryBlobs>,
    }

    async fn setup(analyzer_delay: Duration, budget: Duration) -> Setup {
        let queues = Arc::new(MemoryQueues::new(Duration::from_secs(5)));
        let blobs = Arc::new(MemoryBlobs::new());
        queues.create_queue(WORKER_TASK_QUEUE_NAME).await.unwrap();
        queues.create_queue(WORKER_RESULT_QUEUE_NAME).await.unwrap();

        let fetcher = StubFetcher(HashMap::from([("http://in/a.txt", "hola mundo")]));
        let worker = Worker::connect(
            "test".into(),
            queues.clone(),
            blobs.clone(),
            Arc::new(fetcher),
            Arc::new(UpperAnalyzer {
                delay: analyzer_delay,
            }),
            budget,
        )
        .await
        .unwrap();
        Setup {
            worker: Arc::new(worker),
            queues,
            blobs,
        }
    }

    fn task(locator: &str, index: u32) -> TaskMessage {
        let directive = Directive::parse(&format!("POS\t{}", locator)).unwrap();
        TaskMessage::new(&"job-1".to_string(), index, &directive)
    }

    async fn deliver(s: &Setup, task: &TaskMessage) -> Message {
        s.queues
            .send(&s.worker.tasks, &task.to_message())
            .await
            .unwrap();
        s.queues
            .receive(&s.worker.tasks, 1, Duration::ZERO)
            .await
            .unwrap()
            .remove(0)
    }

    async fn published(s: &Setup) -> Vec<ResultMessage> {
        s.queues
            .receive(&s.worker.results, 10, Duration::ZERO)
            .await
            .unwrap()
            .iter()
            .map(|m| ResultMessage::parse(&m.body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn tarea_exitosa_sube_salida_publica_y_hace_ack() {
        let s = setup(Duration::ZERO, Duration::from_secs(5)).await;
        let t = task("http://in/a.txt", 3);
        let msg = deliver(&s, &t).await;

        s.worker.process_message(msg).await;

        let results = published(&s).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].index, 3);
        let key = task_output_key(&t.job_id, &output_name(&t));
        assert_eq!(results[0].outcome, Outcome::Output(key.clone()));
        assert_eq!(s.blobs.get_text(&key).as_deref(), Some("POS|HOLA MUNDO"));
        assert_eq!(s.queues.depth(&s.worker.tasks), 0);
    }

    #[tokio::test]
    async fn fallo_al_bajar_el_recurso_viaja_como_error() {
        let s = setup(Duration::ZERO, Duration::from_secs(5)).await;
        let msg = deliver(&s, &task("http://in/falta.txt", 0)).await;

        s.worker.process_message(msg).await;

        let results = published(&s).await;
        assert!(results[0].outcome.is_error());
        assert!(results[0].outcome.to_string().starts_with("Exception: 404"));
        assert!(s.blobs.keys().is_empty());
        assert_eq!(s.queues.depth(&s.worker.tasks), 0);
    }

    #[tokio::test]
    async fn sin_cola_de_resultados_la_tarea_queda_sin_ack() {
        let s = setup(Duration::ZERO, Duration::from_secs(5)).await;
        let msg = deliver(&s, &task("http://in/a.txt", 0)).await;
        s.queues.delete_queue(&s.worker.results).await.unwrap();

        s.worker.process_message(msg).await;

        assert_eq!(s.queues.depth(&s.worker.tasks), 1);
    }

    #[tokio::test]
    async fn tarea_que_excede_el_plazo_no_se_borra() {
        let s = setup(Duration::from_millis(300), Duration::from_millis(50)).await;
        let msg = deliver(&s, &task("http://in/a.txt", 0)).await;

        s.worker.process_message(msg).await;

        assert!(published(&s).await.is_empty());
        assert_eq!(s.queues.depth(&s.worker.tasks), 1);
    }

    #[tokio::test]
    async fn tarea_mal_formada_se_descarta() {
        let s = setup(Duration::ZERO, Duration::from_secs(5)).await;
        s.queues.send(&s.worker.tasks, "POS\tsolo").await.unwrap();
        let msg = s
            .queues
            .receive(&s.worker.tasks, 1, Duration::ZERO)
            .await
            .unwrap()
            .remove(0);

        s.worker.process_message(msg).await;

        assert!(published(&s).await.is_empty());
        assert_eq!(s.queues.depth(&s.worker.tasks), 0);
    }

    #[test]
    fn nombre_de_salida_es_estable_por_tarea() {
        let a = task("http://in/a.txt", 0);
        assert_eq!(output_name(&a), output_name(&task("http://in/a.txt", 0)));
        assert_ne!(output_name(&a), output_name(&task("http://in/a.txt", 1)));
    }

    #[tokio::test]
    async fn el_loop_termina_cuando_borran_la_cola_de_tareas() {
        let s = setup(Duration::ZERO, Duration::from_secs(5)).await;
        s.queues
            .send(&s.worker.tasks, &task("http://in/a.txt", 0).to_message())
            .await
            .unwrap();

        let handle = tokio::spawn(s.worker.clone().run(2, Duration::from_millis(50)));

        let got = s
            .queues
            .receive(&s.worker.results, 1, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);

        s.queues.delete_queue(&s.worker.tasks).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
