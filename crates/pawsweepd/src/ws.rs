//! Live update socket.
//!
//! Each connection gets one `performance` and one `status` snapshot, then every
//! event published on the bus from that point on. A subscriber that lags
//! behind skips ahead; nothing is replayed.

use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use pawsweep_shared::{ClientMessage, LiveEvent};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

type AppStateArc = Arc<AppState>;

pub fn routes() -> Router<AppStateArc> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppStateArc>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: AppStateArc) {
    // Subscribe before the snapshots so nothing published in between is lost.
    let mut events = state.bus.subscribe();
    info!("Live subscriber connected ({} total)", state.bus.subscriber_count());

    if send_event(&mut socket, &LiveEvent::Performance(state.inference.performance()))
        .await
        .is_err()
    {
        return;
    }
    if let Some(status) = state.coordinator.status().await {
        if send_event(&mut socket, &LiveEvent::Status(status)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Live subscriber lagging, skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => handle_client_message(&mut socket, &state, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Live socket error: {}", e);
                    break;
                }
            },
        }
    }
    info!("Live subscriber disconnected");
}

async fn handle_client_message(socket: &mut WebSocket, state: &AppState, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::ManualClean) => {
            // Outcome reaches every subscriber as a cleaningUpdate.
            if let Err(e) = state.coordinator.manual_clean().await {
                info!("Manual clean over live socket rejected: {}", e);
            }
        }
        Ok(ClientMessage::GetPerformance) => {
            let event = LiveEvent::Performance(state.inference.performance());
            let _ = send_event(socket, &event).await;
        }
        Err(e) => debug!("Ignoring live message {:?}: {}", text, e),
    }
}

async fn send_event(socket: &mut WebSocket, event: &LiveEvent) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Cannot encode {} event: {}", event.kind(), e);
            return Ok(());
        }
    };
    socket.send(Message::Text(text)).await
}
