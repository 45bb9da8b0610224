use crate::error::ProtocolError;
use crate::queue::QueueAddr;
use crate::FIELD_SEPARATOR;

pub type JobId = String;

/// Primer campo de un pedido de job.
pub const JOB_REQUEST_TAG: &str = "TASK";

/// Centinela que pide drenar y apagar el sistema.
pub const TERMINATE_MESSAGE: &str = "TERMINATE";

/// Pedido de un submitter: `TASK \t inputKey \t n \t replyAddress`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Clave del archivo de entrada en el blob store
    pub input_key: String,

    /// Cuántas tareas debería atender cada worker (el `n` del submitter)
    pub concurrency_hint: u32,

    /// Cola donde se avisa que el reporte está listo
    pub reply_address: QueueAddr,
}

impl JobRequest {
    pub fn to_message(&self) -> String {
        [
            JOB_REQUEST_TAG,
            &self.input_key,
            &self.concurrency_hint.to_string(),
            self.reply_address.as_str(),
        ]
        .join(&FIELD_SEPARATOR.to_string())
    }
}

/// Lo que puede llegar por la cola de entrada del coordinador.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeMessage {
    Job(JobRequest),
    Terminate,
}

impl IntakeMessage {
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ProtocolError::Empty);
        }
        if body == TERMINATE_MESSAGE {
            return Ok(IntakeMessage::Terminate);
        }

        let parts: Vec<&str> = body.split(FIELD_SEPARATOR).map(str::trim).collect();
        if parts[0] != JOB_REQUEST_TAG {
            return Err(ProtocolError::UnknownKind(parts[0].to_string()));
        }
        if parts.len() != 4 {
            return Err(ProtocolError::FieldCount {
                expected: 4,
                found: parts.len(),
            });
        }

        let input_key = non_empty("inputKey", parts[1])?;
        let concurrency_hint = match parts[2].parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => {
                return Err(ProtocolError::InvalidField {
                    field: "n",
                    value: parts[2].to_string(),
                })
            }
        };
        let reply_address = QueueAddr::new(non_empty("replyAddress", parts[3])?);

        Ok(IntakeMessage::Job(JobRequest {
            input_key,
            concurrency_hint,
            reply_address,
        }))
    }
}

pub(crate) fn non_empty(field: &'static str, value: &str) -> Result<String, ProtocolError> {
    if value.is_empty() {
        Err(ProtocolError::InvalidField {
            field,
            value: value.to_string(),
        })
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pedido_de_job_completo() {
        let req = JobRequest {
            input_key: "input/abc/in.txt".into(),
            concurrency_hint: 3,
            reply_address: QueueAddr::new("http://broker/api/v1/queues/LocalAppQueue-abc"),
        };

        let parsed = IntakeMessage::parse(&req.to_message()).unwrap();
        assert_eq!(parsed, IntakeMessage::Job(req));
    }

    #[test]
    fn parse_reconoce_centinela_de_apagado() {
        assert_eq!(
            IntakeMessage::parse("TERMINATE\n").unwrap(),
            IntakeMessage::Terminate
        );
    }

    #[test]
    fn parse_rechaza_n_cero_o_no_numerico() {
        for n in ["0", "-2", "muchos"] {
            let body = format!("TASK\tinput/x\t{}\treply", n);
            assert!(matches!(
                IntakeMessage::parse(&body),
                Err(ProtocolError::InvalidField { field: "n", .. })
            ));
        }
    }

    #[test]
    fn parse_rechaza_campos_faltantes_y_tipo_desconocido() {
        assert_eq!(
            IntakeMessage::parse("TASK\tinput/x\t3"),
            Err(ProtocolError::FieldCount {
                expected: 4,
                found: 3
            })
        );
        assert!(matches!(
            IntakeMessage::parse("HOLA\ta\tb\tc"),
            Err(ProtocolError::UnknownKind(_))
        ));
        assert_eq!(IntakeMessage::parse("  "), Err(ProtocolError::Empty));
    }
}
