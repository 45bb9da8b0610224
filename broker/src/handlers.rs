use std::str::FromStr;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use common::api::{
    CreateQueueRequest, InstanceIdsResponse, InstancesQuery, InstancesResponse, LaunchRequest,
    QueueAddrResponse, ReceiveRequest, ReceiveResponse, SendMessageRequest, TerminateRequest,
};
use common::{BlobStore, FleetProvisioner, InstanceState, MessageQueue, QueueAddr, ServiceError};
use tracing::{debug, info};

use crate::state::BrokerState;

// tope del long-poll en segundos
const MAX_WAIT_SECS: u64 = 20;
const MAX_BATCH: usize = 10;
const MAX_BLOB_BYTES: usize = 64 * 1024 * 1024;

pub fn build_router(state: BrokerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/queues", post(create_queue))
        .route("/api/v1/queues/:name", get(get_queue).delete(delete_queue))
        .route("/api/v1/queues/:name/messages", post(send_message))
        .route("/api/v1/queues/:name/messages/:receipt", delete(delete_message))
        .route("/api/v1/queues/:name/receive", post(receive_messages))
        .route("/api/v1/blobs/*key", get(get_blob).put(put_blob))
        .route("/api/v1/instances", get(list_instances).post(launch_instances))
        .route("/api/v1/instances/terminate", post(terminate_instances))
        .layer(DefaultBodyLimit::max(MAX_BLOB_BYTES))
        .with_state(state)
}

/// Errores de servicio traducidos a status HTTP.
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Other(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn valid_queue_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// "running,pending" -> estados. Vacío significa todos.
fn parse_states(raw: &str) -> Result<Vec<InstanceState>, ServiceError> {
    if raw.trim().is_empty() {
        return Ok(vec![
            InstanceState::Pending,
            InstanceState::Running,
            InstanceState::ShuttingDown,
            InstanceState::Terminated,
        ]);
    }
    raw.split(',').map(|s| InstanceState::from_str(s.trim())).collect()
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

/* --------- Colas --------- */

async fn create_queue(
    State(state): State<BrokerState>,
    Json(req): Json<CreateQueueRequest>,
) -> ApiResult<Json<QueueAddrResponse>> {
    if !valid_queue_name(&req.name) {
        return Err(ServiceError::Other(format!("nombre de cola inválido: {:?}", req.name)).into());
    }
    state.queues.create_queue(&req.name).await?;
    debug!("cola {} lista", req.name);
    Ok(Json(QueueAddrResponse {
        addr: state.public_addr(&req.name),
    }))
}

async fn get_queue(
    State(state): State<BrokerState>,
    Path(name): Path<String>,
) -> ApiResult<Json<QueueAddrResponse>> {
    match state.queues.queue_addr(&name).await? {
        Some(_) => Ok(Json(QueueAddrResponse {
            addr: state.public_addr(&name),
        })),
        None => Err(ServiceError::NotFound(name).into()),
    }
}

async fn delete_queue(
    State(state): State<BrokerState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.queues.delete_queue(&QueueAddr::new(&name)).await?;
    info!("cola {} borrada", name);
    Ok(StatusCode::NO_CONTENT)
}

async fn send_message(
    State(state): State<BrokerState>,
    Path(name): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<StatusCode> {
    state.queues.send(&QueueAddr::new(name), &req.body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn receive_messages(
    State(state): State<BrokerState>,
    Path(name): Path<String>,
    Json(req): Json<ReceiveRequest>,
) -> ApiResult<Json<ReceiveResponse>> {
    let wait = Duration::from_secs(req.wait_secs.min(MAX_WAIT_SECS));
    let max = req.max_messages.clamp(1, MAX_BATCH);
    let messages = state
        .queues
        .receive(&QueueAddr::new(name), max, wait)
        .await?;
    Ok(Json(ReceiveResponse { messages }))
}

async fn delete_message(
    State(state): State<BrokerState>,
    Path((name, receipt)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .queues
        .delete_message(&QueueAddr::new(name), &receipt)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/* --------- Blobs --------- */

async fn put_blob(
    State(state): State<BrokerState>,
    Path(key): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let size = body.len();
    state.blobs.put(&key, body.to_vec()).await?;
    debug!("blob {} guardado ({} bytes)", key, size);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_blob(
    State(state): State<BrokerState>,
    Path(key): Path<String>,
) -> ApiResult<Vec<u8>> {
    Ok(state.blobs.get(&key).await?)
}

/* --------- Flota --------- */

async fn list_instances(
    State(state): State<BrokerState>,
    Query(query): Query<InstancesQuery>,
) -> ApiResult<Json<InstancesResponse>> {
    let states = parse_states(&query.states)?;
    let instances = state.fleet.describe(query.role, &states).await?;
    Ok(Json(InstancesResponse { instances }))
}

async fn launch_instances(
    State(state): State<BrokerState>,
    Json(req): Json<LaunchRequest>,
) -> ApiResult<Json<InstanceIdsResponse>> {
    let instance_ids = state.fleet.launch(req.role, req.count).await?;
    Ok(Json(InstanceIdsResponse { instance_ids }))
}

async fn terminate_instances(
    State(state): State<BrokerState>,
    Json(req): Json<TerminateRequest>,
) -> ApiResult<StatusCode> {
    state.fleet.terminate(&req.instance_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}
