use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use common::{
    FleetProvisioner, Instance, InstanceId, InstanceState, Role, ServiceError, ServiceResult,
};
use tokio::process::{Child, Command};
use tracing::{info, warn};

struct LocalInstance {
    instance: Instance,
    // None si el rol no tiene comando: la instancia es sólo inventario
    child: Option<Child>,
}

/// Flota local: cada instancia lanzada es un proceso hijo que corre el
/// comando configurado para su rol.
pub struct LocalFleet {
    instances: Mutex<HashMap<InstanceId, LocalInstance>>,
    worker_cmd: Option<String>,
    manager_cmd: Option<String>,
    broker_url: String,
}

impl LocalFleet {
    pub fn new(
        worker_cmd: Option<String>,
        manager_cmd: Option<String>,
        broker_url: impl Into<String>,
    ) -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            worker_cmd,
            manager_cmd,
            broker_url: broker_url.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<InstanceId, LocalInstance>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn command_for(&self, role: Role) -> Option<&str> {
        match role {
            Role::Worker => self.worker_cmd.as_deref(),
            Role::Manager => self.manager_cmd.as_deref(),
        }
    }

    fn spawn(&self, cmd: &str, id: &InstanceId, role: Role) -> ServiceResult<Child> {
        Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .env("INSTANCE_ID", id)
            .env("ROLE", role.as_str())
            .env("BROKER_URL", &self.broker_url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ServiceError::Other(format!("no se pudo lanzar {}: {}", role, e)))
    }
}

/// Marca como terminadas las instancias cuyo proceso ya salió.
fn reap(instances: &mut HashMap<InstanceId, LocalInstance>) {
    for local in instances.values_mut() {
        let Some(child) = local.child.as_mut() else {
            continue;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                if local.instance.state != InstanceState::Terminated {
                    info!("instancia {} salió con {}", local.instance.id, status);
                }
                local.instance.state = InstanceState::Terminated;
                local.child = None;
            }
            Ok(None) => {}
            Err(e) => warn!("no se pudo consultar la instancia {}: {}", local.instance.id, e),
        }
    }
}

#[async_trait]
impl FleetProvisioner for LocalFleet {
    async fn describe(&self, role: Role, states: &[InstanceState]) -> ServiceResult<Vec<Instance>> {
        let mut instances = self.lock();
        reap(&mut instances);
        let mut found: Vec<Instance> = instances
            .values()
            .map(|l| &l.instance)
            .filter(|i| i.role == role && states.contains(&i.state))
            .cloned()
            .collect();
        found.sort_by_key(|i| i.launched_at);
        Ok(found)
    }

    async fn launch(&self, role: Role, count: u32) -> ServiceResult<Vec<InstanceId>> {
        let mut ids = Vec::new();
        for _ in 0..count {
            let id = format!("i-{}", uuid::Uuid::new_v4().simple());
            let child = match self.command_for(role) {
                Some(cmd) => Some(self.spawn(cmd, &id, role)?),
                None => None,
            };
            info!("instancia {} lanzada con rol {}", id, role);

            self.lock().insert(
                id.clone(),
                LocalInstance {
                    instance: Instance {
                        id: id.clone(),
                        role,
                        state: InstanceState::Running,
                        launched_at: Utc::now(),
                    },
                    child,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn terminate(&self, ids: &[InstanceId]) -> ServiceResult<()> {
        let mut instances = self.lock();
        for id in ids {
            let Some(local) = instances.get_mut(id) else {
                warn!("terminate de instancia desconocida {}", id);
                continue;
            };
            if let Some(mut child) = local.child.take() {
                if let Err(e) = child.start_kill() {
                    warn!("no se pudo matar la instancia {}: {}", id, e);
                }
            }
            local.instance.state = InstanceState::Terminated;
            info!("instancia {} terminada", id);
        }
        Ok(())
    }

    async fn self_instance_id(&self) -> ServiceResult<Option<InstanceId>> {
        // el broker no corre dentro de una instancia de su propia flota
        Ok(None)
    }
}
