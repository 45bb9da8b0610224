use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::job::{non_empty, JobId};
use crate::FIELD_SEPARATOR;

/// Nombre de la operación de análisis que ejecuta el worker
/// (`POS`, `CONSTITUENCY`, `DEPENDENCY`, ...). El coordinador no la interpreta.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisKind(String);

impl AnalysisKind {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.contains(char::is_whitespace) {
            return Err(ProtocolError::InvalidField {
                field: "analysisKind",
                value: raw.to_string(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Una línea válida del archivo de entrada: `KIND \t URL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: AnalysisKind,
    pub locator: String,
}

impl Directive {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let parts: Vec<&str> = line.split(FIELD_SEPARATOR).map(str::trim).collect();
        if parts.len() != 2 {
            return Err(ProtocolError::FieldCount {
                expected: 2,
                found: parts.len(),
            });
        }
        Ok(Directive {
            kind: AnalysisKind::parse(parts[0])?,
            locator: non_empty("resourceLocator", parts[1])?,
        })
    }
}

/// Resultado de partir un archivo de entrada.
#[derive(Debug, Clone, Default)]
pub struct ParsedInput {
    pub directives: Vec<Directive>,
    /// Líneas no vacías descartadas por mal formadas
    pub skipped: usize,
}

/// Parte el texto en directivas, una por línea. Las líneas en blanco se
/// ignoran y las mal formadas se cuentan en `skipped`.
pub fn parse_directives(text: &str) -> ParsedInput {
    let mut parsed = ParsedInput::default();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match Directive::parse(line) {
            Ok(d) => parsed.directives.push(d),
            Err(_) => parsed.skipped += 1,
        }
    }
    parsed
}

/// Mensaje coordinador → worker: `KIND \t URL \t JOB_ID \t INDEX`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMessage {
    pub kind: AnalysisKind,
    pub locator: String,
    pub job_id: JobId,
    /// Posición de la directiva dentro del job (0..total)
    pub index: u32,
}

impl TaskMessage {
    pub fn new(job_id: &JobId, index: u32, directive: &Directive) -> Self {
        Self {
            kind: directive.kind.clone(),
            locator: directive.locator.clone(),
            job_id: job_id.clone(),
            index,
        }
    }

    pub fn to_message(&self) -> String {
        [
            self.kind.as_str(),
            &self.locator,
            &self.job_id,
            &self.index.to_string(),
        ]
        .join(&FIELD_SEPARATOR.to_string())
    }

    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let parts: Vec<&str> = body.trim().split(FIELD_SEPARATOR).collect();
        if parts.len() != 4 {
            return Err(ProtocolError::FieldCount {
                expected: 4,
                found: parts.len(),
            });
        }
        Ok(TaskMessage {
            kind: AnalysisKind::parse(parts[0])?,
            locator: non_empty("resourceLocator", parts[1])?,
            job_id: non_empty("jobId", parts[2])?,
            index: parse_index(parts[3])?,
        })
    }
}

pub(crate) fn parse_index(raw: &str) -> Result<u32, ProtocolError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| ProtocolError::InvalidField {
            field: "taskIndex",
            value: raw.to_string(),
        })
}
