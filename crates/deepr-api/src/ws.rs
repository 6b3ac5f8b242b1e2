// WebSocket subscription channel
//
// Clients subscribe to topic prefixes (`jobs.{id}`, `campaigns.{id}`,
// `experts.{name}`) and receive the same delta events the internal bus
// carries; frames stay far smaller than polled GETs because they never
// include the full resource.
//
// Client -> server frames: {"subscribe": "jobs.<id>"}
// Server -> client frames: {"topic": "...", "event": {...}}

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use deepr_contracts::DeeprEvent;

use crate::AppState;

#[derive(Debug, Deserialize)]
struct ClientFrame {
    subscribe: String,
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, mut socket: WebSocket) {
    // All subscriptions funnel into one channel so a single select loop
    // owns the socket
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<DeeprEvent>();

    loop {
        tokio::select! {
            frame = socket.recv() => {
                let Some(Ok(frame)) = frame else { break };
                match frame {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame { subscribe }) => {
                                debug!(pattern = %subscribe, "WebSocket subscription");
                                let mut bus_rx = state.engine.bus.subscribe(subscribe).await;
                                let forward = events_tx.clone();
                                tokio::spawn(async move {
                                    while let Some(event) = bus_rx.recv().await {
                                        if forward.send(event).is_err() {
                                            break;
                                        }
                                    }
                                });
                            }
                            Err(err) => {
                                warn!(error = %err, "Bad WebSocket frame");
                                let body = json!({"error": "expected {\"subscribe\": \"<topic>\"}"});
                                if socket.send(Message::Text(body.to_string())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                let frame = json!({"topic": event.topic(), "event": event});
                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
        }
    }
}
