use std::fmt;

use crate::error::ProtocolError;
use crate::job::{non_empty, JobId};
use crate::task::{parse_index, AnalysisKind};
use crate::FIELD_SEPARATOR;

/// Prefijo con el que los workers reportan un fallo.
pub const ERROR_PREFIX: &str = "Exception:";

/// Resultado de una tarea: dónde quedó la salida o la descripción del error.
/// Los errores cuentan igual para completar el job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Output(String),
    Error(String),
}

impl Outcome {
    /// Construye un error apto para viajar en un mensaje: sin tabs ni saltos.
    pub fn error(description: impl fmt::Display) -> Self {
        let flat: String = description
            .to_string()
            .chars()
            .map(|c| if c == FIELD_SEPARATOR || c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        Outcome::Error(flat.trim().to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    fn parse(raw: &str) -> Self {
        match raw.strip_prefix(ERROR_PREFIX) {
            Some(rest) => Outcome::Error(rest.trim().to_string()),
            None => Outcome::Output(raw.to_string()),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Output(locator) => f.write_str(locator),
            Outcome::Error(msg) => write!(f, "{} {}", ERROR_PREFIX, msg),
        }
    }
}

/// Mensaje worker → coordinador: `JOB_ID \t URL \t OUTCOME \t KIND \t INDEX`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMessage {
    pub job_id: JobId,
    pub locator: String,
    pub outcome: Outcome,
    pub kind: AnalysisKind,
    pub index: u32,
}

impl ResultMessage {
    pub fn to_message(&self) -> String {
        [
            self.job_id.as_str(),
            &self.locator,
            &self.outcome.to_string(),
            self.kind.as_str(),
            &self.index.to_string(),
        ]
        .join(&FIELD_SEPARATOR.to_string())
    }

    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let parts: Vec<&str> = body.trim().split(FIELD_SEPARATOR).collect();
        if parts.len() != 5 {
            return Err(ProtocolError::FieldCount {
                expected: 5,
                found: parts.len(),
            });
        }
        Ok(ResultMessage {
            job_id: non_empty("jobId", parts[0])?,
            locator: non_empty("resourceLocator", parts[1])?,
            outcome: Outcome::parse(parts[2]),
            kind: AnalysisKind::parse(parts[3])?,
            index: parse_index(parts[4])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcome: Outcome) -> ResultMessage {
        ResultMessage {
            job_id: "job-1".into(),
            locator: "http://a/1.txt".into(),
            outcome,
            kind: AnalysisKind::parse("POS").unwrap(),
            index: 2,
        }
    }

    #[test]
    fn resultado_exitoso_conserva_la_ubicacion() {
        let r = result(Outcome::Output("output/job-1/x.txt".into()));
        let parsed = ResultMessage::parse(&r.to_message()).unwrap();
        assert_eq!(parsed, r);
        assert!(!parsed.outcome.is_error());
    }

    #[test]
    fn error_se_aplana_y_se_reconoce_al_parsear() {
        let r = result(Outcome::error("fallo\tal bajar\nel archivo"));
        let body = r.to_message();

        assert_eq!(body.matches(FIELD_SEPARATOR).count(), 4);

        let parsed = ResultMessage::parse(&body).unwrap();
        assert_eq!(
            parsed.outcome,
            Outcome::Error("fallo al bajar el archivo".into())
        );
    }

    #[test]
    fn resultado_con_campos_faltantes_es_error() {
        assert!(ResultMessage::parse("job-1\thttp://a\tout\tPOS").is_err());
    }
}
