use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use parley_types::events::GatewayCommand;

use crate::hub::ConnectionId;
use crate::ingest::IngestHandler;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one WebSocket connection from upgrade to disconnect.
///
/// The connection is attached to the hub on entry and detached on exit,
/// whichever side closes first. Commands from the client are handled one at
/// a time, in the order they arrive.
pub async fn handle_connection(socket: WebSocket, ingest: IngestHandler) {
    let (mut sender, mut receiver) = socket.split();
    let hub = ingest.hub().clone();

    let (conn_id, mut outbound_rx) = hub.attach().await;
    info!("Connection {} opened", conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward hub events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode event for {}: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout on {} (missed {} pongs), dropping connection", conn_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let ingest_recv = ingest.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&ingest_recv, conn_id, cmd).await,
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} bad command: {} -- raw: {}", conn_id, e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.detach(conn_id).await;
    info!("Connection {} closed", conn_id);
}

async fn handle_command(ingest: &IngestHandler, conn_id: ConnectionId, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Join { username } => {
            let username = username.trim();
            if username.is_empty() {
                warn!("{} tried to join with an empty username", conn_id);
                return;
            }
            if ingest.hub().join(conn_id, username.to_string()).await {
                info!("{} joined the room as {}", conn_id, username);
            }
        }

        GatewayCommand::SendMessage { content, sender } => {
            // Detached so a torn-down connection cannot stop a stored message from being broadcast
            let ingest = ingest.clone();
            let task = tokio::spawn(async move {
                ingest.handle_send(conn_id, content, sender).await;
            });
            if let Err(e) = task.await {
                error!("Ingest task for {} failed: {}", conn_id, e);
            }
        }
    }
}
