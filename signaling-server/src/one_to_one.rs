use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt, TryFutureExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp::ws::{Message, WebSocket};
use warp::Filter;

use webrtc_http_protocol::one_to_one::SignalMessage;

use crate::relay::{ConnectionId, Outbound, Relay};

pub type Connections = Arc<RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Everything the relay shares between connection tasks.
///
/// Registry mutations all go through the single `relay` lock.
#[derive(Clone, Default)]
pub struct RelayState {
    pub connections: Connections,
    pub relay: Arc<RwLock<Relay>>,
}

/// Websocket endpoint served at the root path.
pub fn signaling_filter(
    state: RelayState,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let state = warp::any().map(move || state.clone());
    warp::path::end()
        .and(warp::ws())
        .and(state)
        .map(|ws: warp::ws::Ws, state: RelayState| {
            ws.on_upgrade(move |socket| user_connected(socket, state))
        })
}

pub async fn user_connected(ws: WebSocket, state: RelayState) {
    let connection_id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
    info!("new connection: {connection_id}");

    let (mut user_ws_tx, mut user_ws_rx) = ws.split();

    let (tx, rx) = mpsc::unbounded_channel();
    let mut rx = UnboundedReceiverStream::new(rx);

    tokio::task::spawn(async move {
        while let Some(message) = rx.next().await {
            user_ws_tx
                .send(message)
                .unwrap_or_else(|e| warn!("websocket send error ({connection_id}): {e}"))
                .await;
        }
    });
    state.connections.write().await.insert(connection_id, tx);

    while let Some(result) = user_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                error!("websocket error ({connection_id}): {e}");
                break;
            }
        };
        user_message(connection_id, msg, &state).await;
    }
    info!("connection closed: {connection_id}");
    user_disconnected(connection_id, &state).await;
}

async fn user_message(connection_id: ConnectionId, msg: Message, state: &RelayState) {
    if msg.is_close() || msg.is_ping() || msg.is_pong() {
        return;
    }
    let text = match std::str::from_utf8(msg.as_bytes()) {
        Ok(text) => text,
        Err(_) => {
            error!("non-text frame from {connection_id}, dropping");
            return;
        }
    };
    let request = match SignalMessage::from_json(text) {
        Ok(request) => {
            debug!("message received from {connection_id}: {request:?}");
            request
        }
        Err(error) => {
            error!("bad message from {connection_id}: {error}");
            return;
        }
    };

    let outbound = state.relay.write().await.route(connection_id, request);
    if let Some(outbound) = outbound {
        deliver(outbound, &state.connections).await;
    }
}

async fn deliver(outbound: Outbound, connections: &Connections) {
    let Outbound { to, message } = outbound;
    let text = match message.to_json() {
        Ok(text) => text,
        Err(error) => {
            error!("failed to encode {} for {to}: {error}", message.kind());
            return;
        }
    };
    match connections.read().await.get(&to) {
        Some(recipient_tx) => {
            if recipient_tx.send(Message::text(text)).is_err() {
                warn!("{to} is gone, dropping {}", message.kind());
            }
        }
        None => warn!("no open connection {to}, dropping {}", message.kind()),
    }
}

async fn user_disconnected(connection_id: ConnectionId, state: &RelayState) {
    state.relay.write().await.remove_connection(connection_id);
    state.connections.write().await.remove(&connection_id);
}
