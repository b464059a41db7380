//! WebSocket connection handling
//!
//! Each connection runs one task that drains the client's outbound queue
//! into the socket and watches the inbound side for close, errors and
//! liveness. Inbound content is ignored; the detector is a pure producer.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::message::ServerMessage;

use super::server::AppState;

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClosedByPeer,
    ReadError,
    SendFailed,
    SendTimedOut,
    Idle,
    Evicted,
    ServerShutdown,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: AppState) {
    let greeting = match ServerMessage::connected(&state.config.greeting).to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to encode greeting: {}", e);
            return;
        }
    };

    let (id, mut outbound) = state.registry.register(addr, Arc::from(greeting));
    state.stats.record_connection();
    tracing::info!(
        "Client {} connected from {} ({} live)",
        id,
        addr,
        state.registry.len()
    );

    let (mut sender, mut receiver) = socket.split();
    let send_timeout = state.config.send_timeout();
    let idle_timeout = state.config.idle_timeout();
    let keepalive_every = state.config.keepalive_interval();
    let mut keepalive = interval_at(Instant::now() + keepalive_every, keepalive_every);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();
    let mut shutdown = state.shutdown.clone();

    let reason = loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(text) => {
                    match timeout(send_timeout, sender.send(Message::Text(text.to_string()))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::debug!("Send to client {} failed: {}", id, e);
                            break CloseReason::SendFailed;
                        }
                        Err(_) => break CloseReason::SendTimedOut,
                    }
                }
                // Registry cleared on shutdown.
                None => break CloseReason::Evicted,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break CloseReason::ClosedByPeer,
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => {
                    tracing::debug!("Read from client {} failed: {}", id, e);
                    break CloseReason::ReadError;
                }
            },
            _ = keepalive.tick() => {
                if last_seen.elapsed() >= idle_timeout {
                    break CloseReason::Idle;
                }
                match timeout(send_timeout, sender.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => break CloseReason::SendFailed,
                    Err(_) => break CloseReason::SendTimedOut,
                }
            },
            _ = shutdown.changed() => break CloseReason::ServerShutdown,
        }
    };

    state.registry.remove(id);

    if matches!(
        reason,
        CloseReason::Idle | CloseReason::Evicted | CloseReason::ServerShutdown
    ) {
        let _ = timeout(send_timeout, sender.send(Message::Close(None))).await;
    }

    match reason {
        CloseReason::ClosedByPeer | CloseReason::ServerShutdown | CloseReason::Evicted => {
            tracing::info!(
                "Client {} ({}) disconnected: {:?} ({} live)",
                id,
                addr,
                reason,
                state.registry.len()
            )
        }
        _ => tracing::warn!(
            "Client {} ({}) dropped: {:?} ({} live)",
            id,
            addr,
            reason,
            state.registry.len()
        ),
    }
}

