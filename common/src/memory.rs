//! Implementaciones en memoria de los servicios externos.
//!
//! El broker las usa como backend de colas y los tests de cada crate las
//! usan para correr el coordinador y el worker sin red.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use crate::blob::BlobStore;
use crate::error::{ServiceError, ServiceResult};
use crate::fleet::{FleetProvisioner, Instance, InstanceId, InstanceState, Role};
use crate::queue::{Message, MessageQueue, QueueAddr};

/// Visibility timeout por defecto de las colas en memoria.
pub const DEFAULT_VISIBILITY: Duration = Duration::from_secs(30);

// intervalo máximo entre chequeos mientras se hace long-poll
const POLL_SLICE: Duration = Duration::from_millis(50);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/* ---------------- Colas ---------------- */

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<String>,
    // receipt -> (cuerpo, vencimiento de la invisibilidad)
    in_flight: HashMap<String, (String, Instant)>,
}

impl QueueState {
    /// Devuelve a `ready` los mensajes cuyo visibility timeout venció.
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some((body, _)) = self.in_flight.remove(&receipt) {
                self.ready.push_back(body);
            }
        }
    }
}

/// Colas FIFO con visibility timeout. La dirección de cada cola es su nombre.
#[derive(Debug)]
pub struct MemoryQueues {
    queues: Mutex<HashMap<String, QueueState>>,
    visibility: Duration,
    notify: Notify,
}

impl Default for MemoryQueues {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY)
    }
}

impl MemoryQueues {
    pub fn new(visibility: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            visibility,
            notify: Notify::new(),
        }
    }

    /// Mensajes visibles más los que están en vuelo.
    pub fn depth(&self, queue: &QueueAddr) -> usize {
        lock(&self.queues)
            .get(queue.as_str())
            .map(|q| q.ready.len() + q.in_flight.len())
            .unwrap_or(0)
    }

    pub fn exists(&self, name: &str) -> bool {
        lock(&self.queues).contains_key(name)
    }

    fn try_take(&self, queue: &QueueAddr, max_messages: usize) -> ServiceResult<Vec<Message>> {
        let mut queues = lock(&self.queues);
        let state = queues
            .get_mut(queue.as_str())
            .ok_or_else(|| ServiceError::NotFound(queue.to_string()))?;

        let now = Instant::now();
        state.requeue_expired(now);

        let mut out = Vec::new();
        while out.len() < max_messages {
            let Some(body) = state.ready.pop_front() else {
                break;
            };
            let receipt = uuid::Uuid::new_v4().to_string();
            state
                .in_flight
                .insert(receipt.clone(), (body.clone(), now + self.visibility));
            out.push(Message { body, receipt });
        }
        Ok(out)
    }
}

#[async_trait]
impl MessageQueue for MemoryQueues {
    async fn create_queue(&self, name: &str) -> ServiceResult<QueueAddr> {
        lock(&self.queues).entry(name.to_string()).or_default();
        Ok(QueueAddr::new(name))
    }

    async fn queue_addr(&self, name: &str) -> ServiceResult<Option<QueueAddr>> {
        Ok(self.exists(name).then(|| QueueAddr::new(name)))
    }

    async fn send(&self, queue: &QueueAddr, body: &str) -> ServiceResult<()> {
        {
            let mut queues = lock(&self.queues);
            let state = queues
                .get_mut(queue.as_str())
                .ok_or_else(|| ServiceError::NotFound(queue.to_string()))?;
            state.ready.push_back(body.to_string());
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueAddr,
        max_messages: usize,
        wait: Duration,
    ) -> ServiceResult<Vec<Message>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();

            let batch = self.try_take(queue, max_messages.max(1))?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let slice = (deadline - now).min(POLL_SLICE);
            let _ = tokio::time::timeout(slice, notified).await;
        }
    }

    async fn delete_message(&self, queue: &QueueAddr, receipt: &str) -> ServiceResult<()> {
        let mut queues = lock(&self.queues);
        let state = queues
            .get_mut(queue.as_str())
            .ok_or_else(|| ServiceError::NotFound(queue.to_string()))?;
        // un receipt vencido ya no borra nada: el mensaje volvió a la cola
        state.in_flight.remove(receipt);
        Ok(())
    }

    async fn delete_queue(&self, queue: &QueueAddr) -> ServiceResult<()> {
        lock(&self.queues).remove(queue.as_str());
        self.notify.notify_waiters();
        Ok(())
    }
}

/* ---------------- Blobs ---------------- */

#[derive(Debug, Default)]
pub struct MemoryBlobs {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.blobs).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get_text(&self, key: &str) -> Option<String> {
        lock(&self.blobs)
            .get(key)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn put(&self, key: &str, data: Vec<u8>) -> ServiceResult<()> {
        lock(&self.blobs).insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> ServiceResult<Vec<u8>> {
        lock(&self.blobs)
            .get(key)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(key.to_string()))
    }
}

/* ---------------- Flota ---------------- */

/// Flota simulada: las instancias nacen `running` y no ejecutan nada.
#[derive(Debug, Default)]
pub struct MemoryFleet {
    instances: Mutex<Vec<Instance>>,
    self_id: Option<InstanceId>,
    launch_calls: Mutex<Vec<u32>>,
}

impl MemoryFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flota cuyo `self_instance_id` devuelve `id`.
    pub fn with_self_id(id: impl Into<InstanceId>) -> Self {
        Self {
            self_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Agrega instancias ya existentes, ej. para simular workers vivos.
    pub fn seed(&self, role: Role, state: InstanceState, count: u32) {
        let mut instances = lock(&self.instances);
        for _ in 0..count {
            instances.push(Instance {
                id: format!("i-{}", uuid::Uuid::new_v4().simple()),
                role,
                state,
                launched_at: Utc::now(),
            });
        }
    }

    /// Tamaño de cada pedido de `launch`, en orden.
    pub fn launch_calls(&self) -> Vec<u32> {
        lock(&self.launch_calls).clone()
    }
}

#[async_trait]
impl FleetProvisioner for MemoryFleet {
    async fn describe(&self, role: Role, states: &[InstanceState]) -> ServiceResult<Vec<Instance>> {
        Ok(lock(&self.instances)
            .iter()
            .filter(|i| i.role == role && states.contains(&i.state))
            .cloned()
            .collect())
    }

    async fn launch(&self, role: Role, count: u32) -> ServiceResult<Vec<InstanceId>> {
        lock(&self.launch_calls).push(count);
        let mut instances = lock(&self.instances);
        let mut ids = Vec::new();
        for _ in 0..count {
            let id = format!("i-{}", uuid::Uuid::new_v4().simple());
            instances.push(Instance {
                id: id.clone(),
                role,
                state: InstanceState::Running,
                launched_at: Utc::now(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn terminate(&self, ids: &[InstanceId]) -> ServiceResult<()> {
        for inst in lock(&self.instances).iter_mut() {
            if ids.contains(&inst.id) {
                inst.state = InstanceState::Terminated;
            }
        }
        Ok(())
    }

    async fn self_instance_id(&self) -> ServiceResult<Option<InstanceId>> {
        Ok(self.self_id.clone())
    }
}
