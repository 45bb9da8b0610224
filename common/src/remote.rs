//! Cliente HTTP del broker. Implementa los tres servicios externos
//! (colas, blobs y flota) sobre la API `/api/v1` del broker.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use crate::api::{
    CreateQueueRequest, InstanceIdsResponse, InstancesResponse, LaunchRequest, QueueAddrResponse,
    ReceiveRequest, ReceiveResponse, SendMessageRequest, TerminateRequest,
};
use crate::blob::BlobStore;
use crate::error::{ServiceError, ServiceResult};
use crate::fleet::{FleetProvisioner, Instance, InstanceId, InstanceState, Role};
use crate::queue::{Message, MessageQueue, QueueAddr};

// margen sobre el long-poll antes de dar el request por perdido
const RECEIVE_GRACE: Duration = Duration::from_secs(10);
const METADATA_TIMEOUT: Duration = Duration::from_secs(1);

/// URL base del broker.
/// - En Docker: BROKER_URL=http://broker:8080
/// - Local: default http://localhost:8080
pub fn broker_base_url() -> String {
    env::var("BROKER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Debug, Clone)]
pub struct BrokerClient {
    http: Client,
    base_url: String,
    instance_id: Option<InstanceId>,
    metadata_url: Option<String>,
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            instance_id: None,
            metadata_url: None,
        }
    }

    /// Configura de dónde sale la identidad propia: un id fijo (lo que el
    /// broker inyecta como `INSTANCE_ID`) o un endpoint de metadata.
    pub fn with_metadata(
        mut self,
        instance_id: Option<InstanceId>,
        metadata_url: Option<String>,
    ) -> Self {
        self.instance_id = instance_id;
        self.metadata_url = metadata_url;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }
}

/// Convierte respuestas no exitosas en `ServiceError`.
async fn check(resp: Response, what: &str) -> ServiceResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ServiceError::NotFound(what.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl MessageQueue for BrokerClient {
    async fn create_queue(&self, name: &str) -> ServiceResult<QueueAddr> {
        let resp = self
            .http
            .post(self.url("queues"))
            .json(&CreateQueueRequest {
                name: name.to_string(),
            })
            .send()
            .await?;
        let created: QueueAddrResponse = check(resp, name).await?.json().await?;
        Ok(created.addr)
    }

    async fn queue_addr(&self, name: &str) -> ServiceResult<Option<QueueAddr>> {
        let resp = self.http.get(self.url(&format!("queues/{}", name))).send().await?;
        match check(resp, name).await {
            Ok(resp) => Ok(Some(resp.json::<QueueAddrResponse>().await?.addr)),
            Err(ServiceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn send(&self, queue: &QueueAddr, body: &str) -> ServiceResult<()> {
        let resp = self
            .http
            .post(format!("{}/messages", queue))
            .json(&SendMessageRequest {
                body: body.to_string(),
            })
            .send()
            .await?;
        check(resp, queue.as_str()).await?;
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueAddr,
        max_messages: usize,
        wait: Duration,
    ) -> ServiceResult<Vec<Message>> {
        let resp = self
            .http
            .post(format!("{}/receive", queue))
            .timeout(wait + RECEIVE_GRACE)
            .json(&ReceiveRequest {
                max_messages,
                wait_secs: wait.as_secs(),
            })
            .send()
            .await?;
        let received: ReceiveResponse = check(resp, queue.as_str()).await?.json().await?;
        Ok(received.messages)
    }

    async fn delete_message(&self, queue: &QueueAddr, receipt: &str) -> ServiceResult<()> {
        let resp = self
            .http
            .delete(format!("{}/messages/{}", queue, receipt))
            .send()
            .await?;
        check(resp, queue.as_str()).await?;
        Ok(())
    }

    async fn delete_queue(&self, queue: &QueueAddr) -> ServiceResult<()> {
        let resp = self.http.delete(queue.as_str()).send().await?;
        match check(resp, queue.as_str()).await {
            Ok(_) | Err(ServiceError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl BlobStore for BrokerClient {
    async fn put(&self, key: &str, data: Vec<u8>) -> ServiceResult<()> {
        let resp = self
            .http
            .put(self.url(&format!("blobs/{}", key)))
            .body(data)
            .send()
            .await?;
        check(resp, key).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> ServiceResult<Vec<u8>> {
        let resp = self.http.get(self.url(&format!("blobs/{}", key))).send().await?;
        let bytes = check(resp, key).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FleetProvisioner for BrokerClient {
    async fn describe(&self, role: Role, states: &[InstanceState]) -> ServiceResult<Vec<Instance>> {
        let states = states
            .iter()
            .map(InstanceState::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let resp = self
            .http
            .get(self.url("instances"))
            .query(&[("role", role.as_str()), ("states", states.as_str())])
            .send()
            .await?;
        let listed: InstancesResponse = check(resp, "instances").await?.json().await?;
        Ok(listed.instances)
    }

    async fn launch(&self, role: Role, count: u32) -> ServiceResult<Vec<InstanceId>> {
        let resp = self
            .http
            .post(self.url("instances"))
            .json(&LaunchRequest { role, count })
            .send()
            .await?;
        let launched: InstanceIdsResponse = check(resp, "instances").await?.json().await?;
        Ok(launched.instance_ids)
    }

    async fn terminate(&self, ids: &[InstanceId]) -> ServiceResult<()> {
        let resp = self
            .http
            .post(self.url("instances/terminate"))
            .json(&TerminateRequest {
                instance_ids: ids.to_vec(),
            })
            .send()
            .await?;
        check(resp, "instances").await?;
        Ok(())
    }

    async fn self_instance_id(&self) -> ServiceResult<Option<InstanceId>> {
        if let Some(id) = &self.instance_id {
            return Ok(Some(id.clone()));
        }
        let Some(url) = &self.metadata_url else {
            return Ok(None);
        };

        // fuera de una instancia el endpoint no responde: no es un error
        match self.http.get(url).timeout(METADATA_TIMEOUT).send().await {
            Ok(resp) if resp.status().is_success() => {
                let id = resp.text().await?.trim().to_string();
                Ok((!id.is_empty()).then_some(id))
            }
            Ok(resp) => {
                debug!("metadata respondió {}", resp.status());
                Ok(None)
            }
            Err(e) => {
                debug!("metadata inaccesible: {}", e);
                Ok(None)
            }
        }
    }
}
