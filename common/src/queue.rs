use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;

/// Dirección opaca de una cola. Es lo que viaja como `replyAddress`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueAddr(String);

impl QueueAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mensaje leído de una cola. Queda invisible para otros consumidores
/// hasta que se borra con su `receipt` o vence el visibility timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub body: String,
    pub receipt: String,
}

/// Servicio de colas durable con entrega at-least-once.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Crea la cola o devuelve la dirección de la existente.
    async fn create_queue(&self, name: &str) -> ServiceResult<QueueAddr>;

    /// Busca una cola por nombre.
    async fn queue_addr(&self, name: &str) -> ServiceResult<Option<QueueAddr>>;

    async fn send(&self, queue: &QueueAddr, body: &str) -> ServiceResult<()>;

    /// Long-poll: bloquea hasta `wait` esperando mensajes y devuelve
    /// como mucho `max_messages`.
    async fn receive(
        &self,
        queue: &QueueAddr,
        max_messages: usize,
        wait: Duration,
    ) -> ServiceResult<Vec<Message>>;

    /// Acknowledge: borra definitivamente el mensaje.
    async fn delete_message(&self, queue: &QueueAddr, receipt: &str) -> ServiceResult<()>;

    /// Borrar una cola inexistente no es un error.
    async fn delete_queue(&self, queue: &QueueAddr) -> ServiceResult<()>;
}
