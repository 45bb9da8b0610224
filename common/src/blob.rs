use async_trait::async_trait;

use crate::error::ServiceResult;
use crate::job::JobId;

/// Almacén de objetos direccionado por clave.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Escribir dos veces la misma clave reemplaza el contenido.
    async fn put(&self, key: &str, data: Vec<u8>) -> ServiceResult<()>;

    async fn get(&self, key: &str) -> ServiceResult<Vec<u8>>;
}

/* --------- Convenciones de claves --------- */

/// Entrada de un submitter: `input/{submission}/{archivo}`.
pub fn input_key(submission_id: &str, file_name: &str) -> String {
    format!("input/{}/{}", submission_id, file_name)
}

/// Salida de una tarea: `output/{job}/{sufijo}.txt`.
pub fn task_output_key(job_id: &JobId, suffix: &str) -> String {
    format!("output/{}/{}.txt", job_id, suffix)
}

/// Reporte final de un job. Es estable para que reescribirlo sea idempotente.
pub fn report_key(job_id: &JobId) -> String {
    format!("output/{}.html", job_id)
}
