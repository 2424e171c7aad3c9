//! Per-connection actor for an authenticated dashboard channel.
//!
//! Splits the WebSocket into reader and writer halves:
//! - Writer task: owns the sink, drains the channel's bounded outbound queue
//! - Reader loop: parses inbound JSON, answers pings, refreshes liveness
//!
//! Liveness probing itself is centralized in the registry's heartbeat sweep;
//! the actor only reports transport pongs back to its handle.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use crate::state::AppState;
use crate::ws::protocol::{ClientMessage, ServerMessage};
use crate::ws::registry::{ChannelHandle, CLOSE_MALFORMED};

/// Run the actor for an authenticated, owner-verified dashboard connection.
pub async fn run_dashboard(
    socket: WebSocket,
    state: AppState,
    user_id: String,
    restaurant_id: String,
) {
    let (ws_sender, mut ws_receiver) = socket.split();

    // Registering supersedes any prior channel for this restaurant.
    let handle = state.channels.attach(&restaurant_id, &user_id);

    // Spawn writer task: drains the outbound queue into the WebSocket sink.
    let writer_handle = tokio::spawn(writer_task(ws_sender, handle.clone()));

    handle.send(&ServerMessage::ConnectionConfirmed {
        restaurant_id: restaurant_id.clone(),
    });

    tracing::info!(
        user_id = %user_id,
        restaurant_id = %restaurant_id,
        "dashboard channel attached"
    );

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str())
                {
                    Ok(ClientMessage::Ping) => {
                        handle.send(&ServerMessage::Pong);
                    }
                    Ok(ClientMessage::Unknown) => {
                        // Forwarded to the application handler, which is a
                        // no-op for dashboards today.
                        tracing::debug!(
                            restaurant_id = %restaurant_id,
                            "unhandled dashboard message: {}",
                            text.chars().take(100).collect::<String>()
                        );
                    }
                    Err(err) => {
                        tracing::warn!(
                            restaurant_id = %restaurant_id,
                            error = %err,
                            "malformed dashboard frame, closing channel"
                        );
                        handle.close(CLOSE_MALFORMED, "malformed message");
                        break;
                    }
                },
                Message::Pong(_) => {
                    // Transport pong: survives the next heartbeat sweep.
                    handle.mark_alive();
                }
                Message::Ping(data) => {
                    handle.send_raw(Message::Pong(data));
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        restaurant_id = %restaurant_id,
                        "ignoring binary frame on JSON channel"
                    );
                }
                Message::Close(frame) => {
                    tracing::info!(
                        restaurant_id = %restaurant_id,
                        reason = ?frame,
                        "client initiated close"
                    );
                    break;
                }
            },
            Some(Err(err)) => {
                tracing::warn!(
                    restaurant_id = %restaurant_id,
                    error = %err,
                    "dashboard receive error"
                );
                break;
            }
            None => {
                tracing::info!(restaurant_id = %restaurant_id, "dashboard stream ended");
                break;
            }
        }
    }

    // Cleanup: stop the writer and drop the registration, unless a newer
    // channel already took the slot.
    writer_handle.abort();
    state.channels.detach(&restaurant_id, handle.conn_id);

    tracing::info!(
        user_id = %user_id,
        restaurant_id = %restaurant_id,
        "dashboard channel detached"
    );
}

/// Writer task: drains the bounded outbound queue into the WebSocket sink.
/// Ends after delivering a close frame or on the first send failure.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    handle: std::sync::Arc<ChannelHandle>,
) {
    while let Some(msg) = handle.next_outbound().await {
        let is_close = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            break;
        }
        if is_close {
            break;
        }
    }
}
