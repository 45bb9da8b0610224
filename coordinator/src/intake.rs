use std::time::Duration;

use common::{IntakeMessage, JobRequest, Message};
use tracing::{info, warn};

use crate::fanout::split_and_dispatch;
use crate::pool::MessagePool;
use crate::state::AppState;

const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Loop de entrada: lee pedidos de jobs de a uno y los despacha en el pool.
///
/// Al recibir el centinela de apagado deja de aceptar jobs, espera a que
/// terminen los fan-out en vuelo y avisa al sequencer que la entrada cerró.
pub async fn run_intake_listener(state: AppState) {
    let pool = MessagePool::new("jobs", state.config.pool_size);
    info!("escuchando pedidos en {}", state.addrs.intake);

    while state.sequencer.accepting_jobs() {
        let messages = match state
            .queues
            .receive(&state.addrs.intake, 1, state.config.poll_wait)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                warn!("error leyendo pedidos: {}", e);
                tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                continue;
            }
        };

        for message in messages {
            handle_intake_message(&state, &pool, message).await;
        }
    }

    info!("entrada cerrada, esperando {} fan-outs en vuelo", pool.busy());
    pool.wait_idle().await;
    state.sequencer.mark_intake_closed();
    info!("listener de pedidos terminado, no se aceptan más jobs");
}

async fn handle_intake_message(state: &AppState, pool: &MessagePool, message: Message) {
    match IntakeMessage::parse(&message.body) {
        Ok(IntakeMessage::Terminate) => {
            info!("pedido de apagado recibido");
            state.ack(&state.addrs.intake, &message).await;
            state.sequencer.request_drain();
        }
        Ok(IntakeMessage::Job(request)) => {
            if !state.sequencer.accepting_jobs() {
                // queda en la cola, que se borra al apagar
                warn!("pedido de job ignorado, el coordinador está drenando");
                return;
            }
            let state = state.clone();
            pool.spawn(async move {
                handle_job_request(&state, message, request).await;
            })
            .await;
        }
        Err(e) => {
            warn!("pedido mal formado descartado ({}): {:?}", e, message.body);
            state.ack(&state.addrs.intake, &message).await;
        }
    }
}

async fn handle_job_request(state: &AppState, message: Message, request: JobRequest) {
    match split_and_dispatch(state, &request).await {
        Ok(dispatch) => {
            info!(
                "pedido {} despachado como job {} ({} tareas, {} líneas descartadas)",
                request.input_key, dispatch.job_id, dispatch.total_tasks, dispatch.skipped
            );
            state.ack(&state.addrs.intake, &message).await;
        }
        Err(e) => {
            warn!(
                "pedido {} queda sin ack para reintento: {:#}",
                request.input_key, e
            );
        }
    }
}
