// =============================================================================
// WebSocket Handler — Push-based signal updates
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<admin token>` or
// `/api/v1/ws?account=<account id>` (access-listed accounts) and receive:
//   1. An immediate full StateSnapshot on connect.
//   2. Every signal lifecycle event (created, countdown, cleared) as it
//      happens, in emission order.
//
// A client that falls behind the broadcast backlog gets a fresh snapshot in
// place of the events it missed.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::auth::authorize;
use crate::app_state::{AppState, StateSnapshot};
use crate::signals::notify::SignalEvent;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
    account: Option<String>,
}

/// One outbound frame.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WsFrame<'a> {
    Snapshot { seq: u64, state: StateSnapshot },
    Event { seq: u64, event: &'a SignalEvent },
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let caller = match authorize(&state, query.token.as_deref(), query.account.as_deref()) {
        Ok(caller) => caller,
        Err(rejection) => {
            warn!(account = ?query.account, "WebSocket connection rejected: not authorised");
            return rejection.into_response();
        }
    };

    info!(caller = %caller, "WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

// =============================================================================
// Connection handler
// =============================================================================

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    // Subscribe before the snapshot so nothing emitted in between is lost.
    let mut events = state.subscribe_events();
    let (mut sender, mut receiver) = socket.split();
    let mut sequence: u64 = 0;

    if let Err(e) = send_snapshot(&mut sender, &state, &mut sequence).await {
        warn!(error = %e, "Failed to send initial WebSocket snapshot");
        return;
    }

    loop {
        tokio::select! {
            // ── Push: lifecycle events ──────────────────────────────────
            event = events.recv() => {
                let sent = match event {
                    Ok(event) => send_event(&mut sender, &state, &event, &mut sequence).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagging — resending snapshot");
                        send_snapshot(&mut sender, &state, &mut sequence).await
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Err(e) = sent {
                    debug!(error = %e, "WebSocket send failed — disconnecting");
                    break;
                }
            }

            // ── Recv: client traffic ────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "WebSocket text message received (heartbeat)");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    info!(frames = sequence, "WebSocket connection closed");
}

// =============================================================================
// Helpers
// =============================================================================

async fn send_frame<S>(
    sender: &mut S,
    state: &AppState,
    frame: &WsFrame<'_>,
) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    state.ws_sequence_number.fetch_add(1, Ordering::Relaxed);
    match serde_json::to_string(frame) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            // Serialisation errors are not network errors; don't disconnect.
            warn!(error = %e, "Failed to serialize WebSocket frame");
            Ok(())
        }
    }
}

async fn send_snapshot<S>(
    sender: &mut S,
    state: &AppState,
    sequence: &mut u64,
) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    *sequence += 1;
    let frame = WsFrame::Snapshot {
        seq: *sequence,
        state: state.build_snapshot(),
    };
    send_frame(sender, state, &frame).await
}

async fn send_event<S>(
    sender: &mut S,
    state: &AppState,
    event: &SignalEvent,
    sequence: &mut u64,
) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    *sequence += 1;
    let frame = WsFrame::Event {
        seq: *sequence,
        event,
    };
    send_frame(sender, state, &frame).await
}
