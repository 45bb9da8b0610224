pub mod api;
pub mod blob;
pub mod error;
pub mod fleet;
pub mod job;
pub mod memory;
pub mod queue;
pub mod remote;
pub mod results;
pub mod task;

pub use blob::BlobStore;
pub use error::{ProtocolError, ServiceError, ServiceResult};
pub use fleet::{FleetProvisioner, Instance, InstanceId, InstanceState, Role};
pub use job::{IntakeMessage, JobId, JobRequest};
pub use queue::{Message, MessageQueue, QueueAddr};
pub use results::{Outcome, ResultMessage};
pub use task::{parse_directives, AnalysisKind, Directive, TaskMessage};

/* --------- Nombres de colas compartidas --------- */

/// Cola por la que los submitters mandan jobs y el centinela de apagado.
pub const MANAGER_TASK_QUEUE_NAME: &str = "ManagerTaskQueue";
/// Cola de tareas que consumen los workers.
pub const WORKER_TASK_QUEUE_NAME: &str = "WorkerTaskQueue";
/// Cola donde los workers publican sus resultados.
pub const WORKER_RESULT_QUEUE_NAME: &str = "WorkerResultQueue";

/// Separador de campos en todos los mensajes de texto.
pub const FIELD_SEPARATOR: char = '\t';

/// Tope de workers: 19 instancias disponibles menos el coordinador.
pub const DEFAULT_MAX_WORKERS: u32 = 18;
