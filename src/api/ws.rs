// =============================================================================
// WebSocket Feed: push the desk snapshot on change
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<admin token>` and receive:
//   1. A full StateSnapshot right after the upgrade.
//   2. Another full snapshot whenever `state_version` moved, checked every
//      250 ms.
//
// Incoming text frames are ignored, Pings are answered, Close ends the feed.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::app_state::DeskState;

const PUSH_CHECK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<DeskState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if !validate_token(state.admin_token(), query.token.as_deref().unwrap_or_default()) {
        warn!("WebSocket connection rejected: invalid token");
        return (StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
    }

    info!("WebSocket client accepted");
    ws.on_upgrade(move |socket| feed(socket, state)).into_response()
}

async fn feed(socket: WebSocket, state: Arc<DeskState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut last_sent = state.current_state_version();
    if let Err(e) = send_snapshot(&mut sender, &state).await {
        warn!(error = %e, "failed to send initial WebSocket snapshot");
        return;
    }

    let mut ticker = interval(PUSH_CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let version = state.current_state_version();
                if version == last_sent {
                    continue;
                }
                if let Err(e) = send_snapshot(&mut sender, &state).await {
                    debug!(error = %e, "WebSocket send failed, closing feed");
                    break;
                }
                last_sent = version;
            }

            msg = receiver.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    info!("WebSocket client disconnected");
}

async fn send_snapshot<S>(sender: &mut S, state: &DeskState) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let snapshot = state.build_snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => {
            sender.send(Message::Text(json)).await?;
            debug!(version = snapshot.state_version, "WebSocket snapshot sent");
            Ok(())
        }
        Err(e) => {
            // Not a transport problem; keep the connection.
            warn!(error = %e, "failed to serialise snapshot");
            Ok(())
        }
    }
}
