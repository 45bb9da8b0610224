use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use common::fleet::ACTIVE_STATES;
use common::{
    FleetProvisioner, InstanceId, MessageQueue, Role, MANAGER_TASK_QUEUE_NAME,
    WORKER_RESULT_QUEUE_NAME, WORKER_TASK_QUEUE_NAME,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Acepta jobs nuevos.
    Running,
    /// Llegó el centinela: no entran jobs, se terminan los que hay.
    Draining,
    /// Desarmando flota, colas y la propia instancia.
    Terminating,
    Stopped,
}

/// Qué se desarmó al apagar.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub workers_terminated: Vec<InstanceId>,
    pub queues_deleted: Vec<String>,
    pub self_terminated: Option<InstanceId>,
}

/// Máquina de estados del apagado: `Running → Draining → Terminating → Stopped`.
#[derive(Debug)]
pub struct ShutdownSequencer {
    phase: RwLock<Phase>,
    intake_closed: AtomicBool,
}

impl Default for ShutdownSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSequencer {
    pub fn new() -> Self {
        Self {
            phase: RwLock::new(Phase::Running),
            intake_closed: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn accepting_jobs(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Pasa de `Running` a `Draining`. Devuelve `false` si ya estaba drenando.
    pub fn request_drain(&self) -> bool {
        self.advance(Phase::Running, Phase::Draining)
    }

    pub fn mark_intake_closed(&self) {
        self.intake_closed.store(true, Ordering::SeqCst);
    }

    /// Drenando y sin fan-outs en vuelo: si además el registro está vacío,
    /// se puede desarmar todo.
    pub fn ready_to_terminate(&self) -> bool {
        self.phase() == Phase::Draining && self.intake_closed.load(Ordering::SeqCst)
    }

    fn advance(&self, from: Phase, to: Phase) -> bool {
        let mut phase = self.phase.write().unwrap_or_else(PoisonError::into_inner);
        if *phase != from {
            return false;
        }
        info!("fase {:?} -> {:?}", from, to);
        *phase = to;
        true
    }

    /// Desarma el sistema en orden: workers, colas compartidas y por último
    /// la instancia propia. Los errores de cada paso se loguean y se sigue.
    pub async fn teardown(
        &self,
        fleet: &dyn FleetProvisioner,
        queues: &dyn MessageQueue,
    ) -> TeardownReport {
        if !self.advance(Phase::Draining, Phase::Terminating) {
            warn!("teardown pedido en fase {:?}, se ignora", self.phase());
            return TeardownReport::default();
        }
        let mut report = TeardownReport::default();

        // 1) workers
        match fleet.describe(Role::Worker, &ACTIVE_STATES).await {
            Ok(instances) => {
                let ids: Vec<InstanceId> = instances.into_iter().map(|i| i.id).collect();
                if !ids.is_empty() {
                    match fleet.terminate(&ids).await {
                        Ok(()) => {
                            info!("workers terminados: {:?}", ids);
                            report.workers_terminated = ids;
                        }
                        Err(e) => warn!("error terminando workers: {}", e),
                    }
                }
            }
            Err(e) => warn!("error listando workers: {}", e),
        }

        // 2) colas compartidas, ya sin nadie que publique
        for name in [
            WORKER_TASK_QUEUE_NAME,
            WORKER_RESULT_QUEUE_NAME,
            MANAGER_TASK_QUEUE_NAME,
        ] {
            match queues.queue_addr(name).await {
                Ok(Some(addr)) => match queues.delete_queue(&addr).await {
                    Ok(()) => {
                        info!("cola {} borrada", name);
                        report.queues_deleted.push(name.to_string());
                    }
                    Err(e) => warn!("error borrando cola {}: {}", name, e),
                },
                Ok(None) => {}
                Err(e) => warn!("error buscando cola {}: {}", name, e),
            }
        }

        // 3) la instancia propia, siempre al final
        match fleet.self_instance_id().await {
            Ok(Some(id)) => match fleet.terminate(std::slice::from_ref(&id)).await {
                Ok(()) => {
                    info!("terminación pedida para la instancia propia {}", id);
                    report.self_terminated = Some(id);
                }
                Err(e) => warn!("error terminando la instancia propia: {}", e),
            },
            Ok(None) => info!("no se pudo determinar la instancia propia, no se termina"),
            Err(e) => warn!("error consultando metadata: {}", e),
        }

        self.advance(Phase::Terminating, Phase::Stopped);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::memory::{MemoryFleet, MemoryQueues};
    use common::{Instance, InstanceState, Message, QueueAddr, ServiceResult};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Registra en orden cada efecto del teardown.
    struct Recorder {
        fleet: MemoryFleet,
        queues: MemoryQueues,
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl FleetProvisioner for Recorder {
        async fn describe(&self, role: Role, states: &[InstanceState]) -> ServiceResult<Vec<Instance>> {
            self.fleet.describe(role, states).await
        }
        async fn launch(&self, role: Role, count: u32) -> ServiceResult<Vec<InstanceId>> {
            self.fleet.launch(role, count).await
        }
        async fn terminate(&self, ids: &[InstanceId]) -> ServiceResult<()> {
            self.push(format!("terminate:{}", ids.len()));
            self.fleet.terminate(ids).await
        }
        async fn self_instance_id(&self) -> ServiceResult<Option<InstanceId>> {
            self.fleet.self_instance_id().await
        }
    }

    #[async_trait]
    impl MessageQueue for Recorder {
        async fn create_queue(&self, name: &str) -> ServiceResult<QueueAddr> {
            self.queues.create_queue(name).await
        }
        async fn queue_addr(&self, name: &str) -> ServiceResult<Option<QueueAddr>> {
            self.queues.queue_addr(name).await
        }
        async fn send(&self, queue: &QueueAddr, body: &str) -> ServiceResult<()> {
            self.queues.send(queue, body).await
        }
        async fn receive(
            &self,
            queue: &QueueAddr,
            max_messages: usize,
            wait: Duration,
        ) -> ServiceResult<Vec<Message>> {
            self.queues.receive(queue, max_messages, wait).await
        }
        async fn delete_message(&self, queue: &QueueAddr, receipt: &str) -> ServiceResult<()> {
            self.queues.delete_message(queue, receipt).await
        }
        async fn delete_queue(&self, queue: &QueueAddr) -> ServiceResult<()> {
            self.push(format!("delete:{}", queue));
            self.queues.delete_queue(queue).await
        }
    }

    async fn recorder(self_id: Option<&str>) -> Arc<Recorder> {
        let fleet = match self_id {
            Some(id) => MemoryFleet::with_self_id(id),
            None => MemoryFleet::new(),
        };
        fleet.seed(Role::Worker, InstanceState::Running, 3);
        fleet.seed(Role::Worker, InstanceState::Terminated, 1);
        let rec = Arc::new(Recorder {
            fleet,
            queues: MemoryQueues::default(),
            events: Mutex::new(Vec::new()),
        });
        for name in [
            MANAGER_TASK_QUEUE_NAME,
            WORKER_TASK_QUEUE_NAME,
            WORKER_RESULT_QUEUE_NAME,
        ] {
            rec.create_queue(name).await.unwrap();
        }
        rec
    }

    #[test]
    fn transiciones_validas_de_fase() {
        let seq = ShutdownSequencer::new();
        assert!(seq.accepting_jobs());
        assert!(!seq.ready_to_terminate());

        assert!(seq.request_drain());
        assert!(!seq.request_drain());
        assert!(!seq.accepting_jobs());
        assert!(!seq.ready_to_terminate());

        seq.mark_intake_closed();
        assert!(seq.ready_to_terminate());
    }

    #[tokio::test]
    async fn teardown_desarma_flota_colas_y_por_ultimo_la_instancia_propia() {
        let rec = recorder(Some("i-manager")).await;
        let seq = ShutdownSequencer::new();
        seq.request_drain();

        let report = seq.teardown(rec.as_ref(), rec.as_ref()).await;

        assert_eq!(seq.phase(), Phase::Stopped);
        assert_eq!(report.workers_terminated.len(), 3);
        assert_eq!(report.self_terminated.as_deref(), Some("i-manager"));
        assert_eq!(
            *rec.events.lock().unwrap(),
            vec![
                "terminate:3".to_string(),
                format!("delete:{}", WORKER_TASK_QUEUE_NAME),
                format!("delete:{}", WORKER_RESULT_QUEUE_NAME),
                format!("delete:{}", MANAGER_TASK_QUEUE_NAME),
                "terminate:1".to_string(),
            ]
        );
        assert_eq!(rec.fleet.count_active(Role::Worker).await.unwrap(), 0);
        assert!(!rec.queues.exists(WORKER_RESULT_QUEUE_NAME));
    }

    #[tokio::test]
    async fn sin_identidad_propia_igual_termina() {
        let rec = recorder(None).await;
        let seq = ShutdownSequencer::new();
        seq.request_drain();

        let report = seq.teardown(rec.as_ref(), rec.as_ref()).await;

        assert_eq!(seq.phase(), Phase::Stopped);
        assert!(report.self_terminated.is_none());
        assert_eq!(report.queues_deleted.len(), 3);
    }

    #[tokio::test]
    async fn teardown_sin_drenar_no_hace_nada() {
        let rec = recorder(Some("i-manager")).await;
        let seq = ShutdownSequencer::new();

        let report = seq.teardown(rec.as_ref(), rec.as_ref()).await;

        assert_eq!(seq.phase(), Phase::Running);
        assert!(report.workers_terminated.is_empty());
        assert!(rec.events.lock().unwrap().is_empty());
    }
}
