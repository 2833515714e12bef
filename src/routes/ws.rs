//! `/ws` (§4.3, §6): the userscript's single duplex connection. Splits the socket into
//! a writer task fed from the multiplexer's outbound queue and a reader loop that routes
//! inbound `{request_id, data}` frames to whichever orchestrator call is waiting.
//!
//! Grounded on the original's `websocket_endpoint`, reshaped around axum's split
//! socket + a writer task rather than one coroutine doing both directions inline.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Extension;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::state::AppState;
use crate::wire::{Frame, InboundEnvelope};

pub fn router() -> Router {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(Extension(state): Extension<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let generation = state.multiplexer.connect(tx);
    info!(generation, "userscript connected");

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => route_inbound(&state, &text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket read error, tearing down connection");
                break;
            }
        }
    }

    state.multiplexer.disconnect(generation);
    writer.abort();
    info!(generation, "userscript disconnected");
}

fn route_inbound(state: &AppState, text: &str) {
    let envelope: InboundEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "invalid frame received from userscript, ignoring");
            return;
        }
    };
    let frame = Frame::from_value(envelope.data);
    state.multiplexer.dispatch_inbound(&envelope.request_id, frame);
}
