use serde::{Deserialize, Serialize};

use crate::fleet::{Instance, InstanceId, Role};
use crate::queue::{Message, QueueAddr};

/* --------- Colas --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQueueRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueAddrResponse {
    pub addr: QueueAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveRequest {
    pub max_messages: usize,
    pub wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveResponse {
    pub messages: Vec<Message>,
}

/* --------- Flota --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancesQuery {
    pub role: Role,
    /// Estados separados por coma, ej: "running,pending"
    pub states: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancesResponse {
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub role: Role,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceIdsResponse {
    pub instance_ids: Vec<InstanceId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateRequest {
    pub instance_ids: Vec<InstanceId>,
}
