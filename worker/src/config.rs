use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_TASK_BUDGET_SECS: u64 = 30;
const DEFAULT_POLL_WAIT_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct Config {
    pub broker_url: String,
    pub analyzer_url: String,
    /// Tareas en paralelo
    pub concurrency: usize,
    /// Tiempo máximo por tarea. Pasado este plazo la cola ya la reentregó.
    pub task_budget: Duration,
    pub poll_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: "http://localhost:8080".to_string(),
            analyzer_url: "http://localhost:9000/analyze".to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            task_budget: Duration::from_secs(DEFAULT_TASK_BUDGET_SECS),
            poll_wait: Duration::from_secs(DEFAULT_POLL_WAIT_SECS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            broker_url: env::var("BROKER_URL").unwrap_or(defaults.broker_url),
            analyzer_url: env::var("ANALYZER_URL").unwrap_or(defaults.analyzer_url),
            concurrency: env_or("WORKER_CONCURRENCY", defaults.concurrency).max(1),
            task_budget: Duration::from_secs(
                env_or("WORKER_VISIBILITY_SECS", DEFAULT_TASK_BUDGET_SECS).max(1),
            ),
            poll_wait: Duration::from_secs(env_or("POLL_WAIT_SECS", DEFAULT_POLL_WAIT_SECS)),
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
