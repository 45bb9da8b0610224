use std::sync::Arc;

use anyhow::{Context, Result};
use common::{FleetProvisioner, Role};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Cuántos workers nuevos pedir para un job de `total_tasks` tareas con
/// `n` tareas por worker, habiendo `current` vivos y un tope de `max_workers`.
pub fn workers_to_create(total_tasks: u32, n: u32, current: u32, max_workers: u32) -> u32 {
    let n = n.max(1);
    let needed = total_tasks.div_ceil(n);
    let wanted = needed.saturating_sub(current);
    let room = max_workers.saturating_sub(current);
    wanted.min(room)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleDecision {
    pub needed: u32,
    pub current: u32,
    pub requested: u32,
}

/// Controla el tamaño de la flota de workers. Sólo crece.
///
/// Las decisiones se serializan: lectura del inventario, cálculo y
/// lanzamiento ocurren bajo el mismo lock para que dos jobs simultáneos
/// no lean el mismo `current` y pasen el tope entre los dos.
pub struct Autoscaler {
    fleet: Arc<dyn FleetProvisioner>,
    max_workers: u32,
    lock: Mutex<()>,
}

impl Autoscaler {
    pub fn new(fleet: Arc<dyn FleetProvisioner>, max_workers: u32) -> Self {
        Self {
            fleet,
            max_workers,
            lock: Mutex::new(()),
        }
    }

    pub async fn ensure_capacity(&self, total_tasks: u32, n: u32) -> Result<ScaleDecision> {
        let _guard = self.lock.lock().await;

        // inventario fresco en cada decisión, nunca cacheado
        let current = self
            .fleet
            .count_active(Role::Worker)
            .await
            .context("consultando inventario de workers")?;

        let requested = workers_to_create(total_tasks, n, current, self.max_workers);
        let decision = ScaleDecision {
            needed: total_tasks.div_ceil(n.max(1)),
            current,
            requested,
        };

        if requested == 0 {
            debug!(
                "capacidad suficiente: necesarios={} vivos={} tope={}",
                decision.needed, current, self.max_workers
            );
            return Ok(decision);
        }

        info!(
            "lanzando {} workers (necesarios={} vivos={} tope={})",
            requested, decision.needed, current, self.max_workers
        );
        self.fleet
            .launch(Role::Worker, requested)
            .await
            .with_context(|| format!("lanzando {} workers", requested))?;

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::memory::MemoryFleet;
    use common::InstanceState;

    #[test]
    fn casos_literales_de_escalado() {
        assert_eq!(workers_to_create(10, 3, 2, 18), 2);
        assert_eq!(workers_to_create(10, 3, 5, 18), 0);
        assert_eq!(workers_to_create(100, 5, 0, 18), 18);
    }

    #[test]
    fn nunca_pide_negativos_ni_pasa_el_tope() {
        assert_eq!(workers_to_create(0, 3, 0, 18), 0);
        assert_eq!(workers_to_create(50, 1, 20, 18), 0);
        assert_eq!(workers_to_create(50, 1, 17, 18), 1);
        // n = 0 se trata como 1
        assert_eq!(workers_to_create(4, 0, 0, 18), 4);
    }

    #[tokio::test]
    async fn ensure_capacity_cuenta_pending_y_running() {
        let fleet = Arc::new(MemoryFleet::new());
        fleet.seed(Role::Worker, InstanceState::Running, 1);
        fleet.seed(Role::Worker, InstanceState::Pending, 1);
        fleet.seed(Role::Worker, InstanceState::Terminated, 4);
        fleet.seed(Role::Manager, InstanceState::Running, 1);

        let scaler = Autoscaler::new(fleet.clone(), 18);
        let decision = scaler.ensure_capacity(10, 3).await.unwrap();

        assert_eq!(
            decision,
            ScaleDecision {
                needed: 4,
                current: 2,
                requested: 2
            }
        );
        assert_eq!(fleet.launch_calls(), vec![2]);
    }

    #[tokio::test]
    async fn decisiones_concurrentes_no_pasan_el_tope() {
        let fleet = Arc::new(MemoryFleet::new());
        let scaler = Arc::new(Autoscaler::new(fleet.clone(), 18));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scaler = scaler.clone();
                tokio::spawn(async move { scaler.ensure_capacity(100, 10).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        // cada job necesita 10; el primero lanza 10 y el resto ya los ve
        assert_eq!(fleet.count_active(Role::Worker).await.unwrap(), 10);
        assert_eq!(fleet.launch_calls(), vec![10]);
    }
}
