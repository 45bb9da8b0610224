//! Acceso a los recursos de entrada y al analizador externo.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use common::AnalysisKind;
use reqwest::Client;

/// Baja el texto de un recurso a partir de su URL.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<String>;
}

/// Corre un tipo de análisis sobre un texto y devuelve la salida.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, kind: &AnalysisKind, text: &str) -> Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<String> {
        let resp = self
            .http
            .get(locator)
            .send()
            .await
            .with_context(|| format!("bajando {}", locator))?;
        if !resp.status().is_success() {
            bail!("{} respondió {}", locator, resp.status());
        }
        Ok(resp.text().await?)
    }
}

/// Analizador remoto: `POST {url}?kind={KIND}` con el texto como cuerpo.
#[derive(Debug, Clone)]
pub struct HttpAnalyzer {
    http: Client,
    url: String,
}

impl HttpAnalyzer {
    pub fn new(http: Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, kind: &AnalysisKind, text: &str) -> Result<String> {
        let resp = self
            .http
            .post(&self.url)
            .query(&[("kind", kind.as_str())])
            .body(text.to_string())
            .send()
            .await
            .with_context(|| format!("llamando al analizador para {}", kind))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("analizador respondió {}: {}", status, body.trim());
        }
        Ok(resp.text().await?)
    }
}
