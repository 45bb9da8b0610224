use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::error;

/// Pool acotado para procesar mensajes.
///
/// `spawn` espera un permiso antes de lanzar la tarea, así que un listener
/// que llama a `spawn` por cada mensaje deja de leer de la cola cuando el
/// pool está lleno.
#[derive(Clone)]
pub struct MessagePool {
    name: &'static str,
    sem: Arc<Semaphore>,
    size: u32,
}

impl MessagePool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1) as u32;
        Self {
            name,
            sem: Arc::new(Semaphore::new(size as usize)),
            size,
        }
    }

    pub async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = match self.sem.clone().acquire_owned().await {
            Ok(p) => p,
            Err(e) => {
                error!("pool {} cerrado: {}", self.name, e);
                return;
            }
        };

        tokio::spawn(async move {
            task.await;
            // liberar el "slot" al terminar
            drop(permit);
        });
    }

    /// Espera a que terminen todas las tareas lanzadas hasta ahora.
    pub async fn wait_idle(&self) {
        if let Ok(all) = self.sem.acquire_many(self.size).await {
            drop(all);
        }
    }

    pub fn busy(&self) -> usize {
        self.size as usize - self.sem.available_permits()
    }
}
