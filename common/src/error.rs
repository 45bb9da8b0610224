use thiserror::Error;

/// Errores al interpretar mensajes de texto (jobs, tareas, resultados).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("mensaje vacío")]
    Empty,

    #[error("se esperaban {expected} campos, llegaron {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("tipo de mensaje desconocido: {0}")]
    UnknownKind(String),

    #[error("campo {field} inválido: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Errores de los servicios externos (colas, blobs, flota).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no existe: {0}")]
    NotFound(String),

    #[error("error de transporte: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("el servicio respondió {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
