// coordinator/src/registry.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use common::{JobId, QueueAddr, ResultMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Active,
    Completed,
}

/// Un job aceptado por el coordinador y todavía no publicado.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub reply_address: QueueAddr,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub results: Vec<ResultMessage>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,

    // índices de tarea ya contados, para descartar reentregas
    received: HashSet<u32>,
}

impl Job {
    fn new(id: JobId, reply_address: QueueAddr, total_tasks: u32) -> Self {
        let state = if total_tasks == 0 {
            JobState::Completed
        } else {
            JobState::Active
        };
        Self {
            id,
            reply_address,
            total_tasks,
            completed_tasks: 0,
            results: Vec::new(),
            state,
            created_at: Utc::now(),
            received: HashSet::new(),
        }
    }
}

/// Qué pasó al registrar un resultado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Contado; el job sigue activo.
    Recorded { completed: u32, total: u32 },
    /// Este resultado completó el job. Sólo un llamador lo ve.
    Completed,
    /// El job ya estaba completo; el resultado se descarta.
    AlreadyCompleted,
    /// Ese índice ya se había contado.
    Duplicate,
    /// Índice fuera de `0..total_tasks`.
    OutOfRange,
    UnknownJob,
}

/// Tabla de jobs en curso.
///
/// `record_result` incrementa, agrega y chequea la completitud de forma
/// atómica por job. `finalize` saca el job completo y lo entrega a un único
/// llamador; si la publicación falla, `restore` lo devuelve para que una
/// reentrega lo vuelva a intentar.
pub trait JobRegistry: Send + Sync {
    fn create_job(&self, reply_address: QueueAddr, total_tasks: u32) -> JobId;

    fn record_result(&self, fragment: ResultMessage) -> RecordOutcome;

    /// Saca y devuelve un job completo. `None` si no existe, sigue activo o
    /// alguien más ya lo reclamó.
    fn finalize(&self, job_id: &str) -> Option<Job>;

    /// Vuelve a poner un job completo cuya publicación falló.
    fn restore(&self, job: Job);

    /// Descarta un job cuyo fan-out no terminó.
    fn abandon(&self, job_id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registro en memoria: el mapa sólo se bloquea para buscar/insertar/sacar,
/// cada job tiene su propio lock para registrar resultados.
#[derive(Debug, Default)]
pub struct InMemoryJobRegistry {
    jobs: Mutex<HashMap<JobId, Arc<Mutex<Job>>>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn snapshot(&self, job_id: &str) -> Option<Job> {
        let entry = lock(&self.jobs).get(job_id).cloned()?;
        let job = lock(&entry).clone();
        Some(job)
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn create_job(&self, reply_address: QueueAddr, total_tasks: u32) -> JobId {
        let id = uuid::Uuid::new_v4().to_string();
        let job = Job::new(id.clone(), reply_address, total_tasks);
        lock(&self.jobs).insert(id.clone(), Arc::new(Mutex::new(job)));
        id
    }

    fn record_result(&self, fragment: ResultMessage) -> RecordOutcome {
        let Some(entry) = lock(&self.jobs).get(&fragment.job_id).cloned() else {
            return RecordOutcome::UnknownJob;
        };

        let mut job = lock(&entry);
        if job.state == JobState::Completed {
            return RecordOutcome::AlreadyCompleted;
        }
        if fragment.index >= job.total_tasks {
            return RecordOutcome::OutOfRange;
        }
        if !job.received.insert(fragment.index) {
            return RecordOutcome::Duplicate;
        }

        job.results.push(fragment);
        job.completed_tasks += 1;

        if job.completed_tasks == job.total_tasks {
            job.state = JobState::Completed;
            RecordOutcome::Completed
        } else {
            RecordOutcome::Recorded {
                completed: job.completed_tasks,
                total: job.total_tasks,
            }
        }
    }

    fn finalize(&self, job_id: &str) -> Option<Job> {
        let mut jobs = lock(&self.jobs);
        let completed = jobs
            .get(job_id)
            .map(|entry| lock(entry).state == JobState::Completed)
            .unwrap_or(false);
        if !completed {
            return None;
        }
        let entry = jobs.remove(job_id)?;
        drop(jobs);

        let job = lock(&entry).clone();
        Some(job)
    }

    fn restore(&self, job: Job) {
        lock(&self.jobs)
            .entry(job.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(job)));
    }

    fn abandon(&self, job_id: &str) -> bool {
        lock(&self.jobs).remove(job_id).is_some()
    }

    fn len(&self) -> usize {
        lock(&self.jobs).len()
    }
}
