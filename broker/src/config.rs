use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    /// URL con la que los clientes llegan a este broker; base de las
    /// direcciones de cola
    pub public_url: String,
    pub data_dir: PathBuf,
    pub visibility: Duration,
    pub worker_cmd: Option<String>,
    pub manager_cmd: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
            data_dir: PathBuf::from("./data"),
            visibility: common::memory::DEFAULT_VISIBILITY,
            worker_cmd: None,
            manager_cmd: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let visibility = match env::var("QUEUE_VISIBILITY_SECS") {
            Ok(raw) => match raw.parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs.max(1)),
                Err(_) => {
                    warn!("QUEUE_VISIBILITY_SECS inválido: {:?}, uso el default", raw);
                    defaults.visibility
                }
            },
            Err(_) => defaults.visibility,
        };
        Self {
            bind: env::var("BROKER_BIND").unwrap_or(defaults.bind),
            public_url: env::var("BROKER_URL").unwrap_or(defaults.public_url),
            data_dir: env::var("BROKER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            visibility,
            worker_cmd: env::var("WORKER_CMD").ok().filter(|s| !s.is_empty()),
            manager_cmd: env::var("MANAGER_CMD").ok().filter(|s| !s.is_empty()),
        }
    }
}
