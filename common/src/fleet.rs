use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

pub type InstanceId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Manager,
    Worker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "Manager",
            Role::Worker => "Worker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Manager" => Ok(Role::Manager),
            "Worker" => Ok(Role::Worker),
            other => Err(ServiceError::Other(format!("rol desconocido: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
        }
    }
}

impl FromStr for InstanceState {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstanceState::Pending),
            "running" => Ok(InstanceState::Running),
            "shutting-down" => Ok(InstanceState::ShuttingDown),
            "terminated" => Ok(InstanceState::Terminated),
            other => Err(ServiceError::Other(format!("estado desconocido: {}", other))),
        }
    }
}

/// Estados que cuentan como capacidad viva.
pub const ACTIVE_STATES: [InstanceState; 2] = [InstanceState::Running, InstanceState::Pending];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub role: Role,
    pub state: InstanceState,
    pub launched_at: DateTime<Utc>,
}

/// Proveedor de cómputo: lanza, lista y termina instancias etiquetadas.
#[async_trait]
pub trait FleetProvisioner: Send + Sync {
    async fn describe(&self, role: Role, states: &[InstanceState]) -> ServiceResult<Vec<Instance>>;

    async fn launch(&self, role: Role, count: u32) -> ServiceResult<Vec<InstanceId>>;

    async fn terminate(&self, ids: &[InstanceId]) -> ServiceResult<()>;

    /// Identidad de la instancia donde corre este proceso, vía metadata.
    /// `None` si no corremos dentro de una instancia del proveedor.
    async fn self_instance_id(&self) -> ServiceResult<Option<InstanceId>>;

    /// Cuántas instancias del rol están running o pending.
    async fn count_active(&self, role: Role) -> ServiceResult<u32> {
        Ok(self.describe(role, &ACTIVE_STATES).await?.len() as u32)
    }
}
