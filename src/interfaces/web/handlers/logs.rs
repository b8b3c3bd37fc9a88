use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::debug;

use crate::core::fanout::{ChannelSubscriber, WsFanout};
use crate::core::types::JobKey;
use crate::interfaces::web::AppState;

/// Events buffered per socket before the fanout counts a send as stalled.
const SOCKET_BUFFER: usize = 64;

pub async fn job_log_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((plugin_id, subscriber_id)): Path<(i64, i64)>,
) -> impl IntoResponse {
    let key = JobKey::new(plugin_id, subscriber_id);
    let fanout = state.fanout.clone();
    ws.on_upgrade(move |socket| stream_job_logs(socket, fanout, key))
}

async fn stream_job_logs(mut socket: WebSocket, fanout: Arc<WsFanout>, key: JobKey) {
    let (subscriber, mut rx) = ChannelSubscriber::new(SOCKET_BUFFER);
    let handle = fanout.connect(key, Arc::new(subscriber));

    loop {
        tokio::select! {
            payload = rx.recv() => match payload {
                Some(payload) => {
                    if socket.send(Message::Text(payload.to_string().into())).await.is_err() {
                        break;
                    }
                }
                // The fanout pruned this handle.
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    fanout.disconnect(&handle);
    debug!("Log socket for {} closed", key);
}
