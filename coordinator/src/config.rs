use std::env;
use std::str::FromStr;
use std::time::Duration;

use common::DEFAULT_MAX_WORKERS;
use tracing::warn;

const DEFAULT_POOL_SIZE: usize = 16;
const DEFAULT_RESULT_BATCH: usize = 10;
const DEFAULT_POLL_WAIT_SECS: u64 = 20;

/// Configuración del coordinador, leída de variables de entorno.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker_url: String,
    /// Tope duro de workers en la flota
    pub max_workers: u32,
    /// Handlers de mensajes en paralelo por listener
    pub pool_size: usize,
    pub result_batch_size: usize,
    /// Espera del long-poll
    pub poll_wait: Duration,
    pub instance_id: Option<String>,
    pub metadata_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: "http://localhost:8080".to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            pool_size: DEFAULT_POOL_SIZE,
            result_batch_size: DEFAULT_RESULT_BATCH,
            poll_wait: Duration::from_secs(DEFAULT_POLL_WAIT_SECS),
            instance_id: None,
            metadata_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            broker_url: env::var("BROKER_URL").unwrap_or(defaults.broker_url),
            max_workers: env_or("MAX_WORKERS", defaults.max_workers),
            pool_size: env_or("MESSAGE_POOL_SIZE", defaults.pool_size).max(1),
            result_batch_size: env_or("RESULT_BATCH_SIZE", defaults.result_batch_size).max(1),
            poll_wait: Duration::from_secs(env_or("POLL_WAIT_SECS", DEFAULT_POLL_WAIT_SECS)),
            instance_id: env::var("INSTANCE_ID").ok().filter(|s| !s.is_empty()),
            metadata_url: env::var("METADATA_URL").ok().filter(|s| !s.is_empty()),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            warn!("valor inválido para {}: {:?}, uso el default", name, raw);
            default
        }),
        Err(_) => default,
    }
}
