use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use coach_types::events::ServerEvent;
use coach_types::models::UserId;

use crate::relay::Relay;

/// Transport-level ping period. Two unanswered pings in a row drop the socket.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Close a socket whose handshake carried no usable identity. Nothing is
/// registered and no `connected` event is sent.
pub async fn reject(mut socket: WebSocket, reason: &'static str) {
    warn!("rejecting chat socket: {}", reason);
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}

/// Serve one accepted chat socket until either side goes away.
pub async fn handle_connection(socket: WebSocket, relay: Relay, user_id: UserId) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn = relay.accept(user_id, tx).await;

    // Set by the reader on Pong, cleared by the heartbeat tick
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("could not encode {} event: {}", event.kind(), e);
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
                            warn!("user {} heartbeat timeout (missed {} pongs), dropping connection", user_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read frames from client; each is handled to completion before the next
    let recv_relay = relay.clone();
    let recv_conn = conn.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    recv_relay.handle_frame(&recv_conn, text.as_str()).await;
                }
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => recv_relay.handle_frame(&recv_conn, text).await,
                    Err(_) => recv_conn.reply(ServerEvent::error("Invalid message format")),
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(frame) => {
                    if let Some(frame) = frame {
                        info!("user {} closed socket: {} {}", user_id, frame.code, frame.reason.as_str());
                    }
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    relay.disconnect(&conn).await;
}
