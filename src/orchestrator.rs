//! Request orchestrator core (C6, §4.5): the task spawned per chat-completion call that
//! drives the stream parser (C3) against one request's frame channel, reacting to
//! rate-limit events by invoking the rotation/auto-fallback engine (C5). HTTP framing
//! (SSE vs. aggregated JSON) lives in `routes::chat`; this module only knows about
//! `LoopEvent`s.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::BridgeError;
use crate::multiplexer::FrameReceiver;
use crate::parser::{ParserEvent, StreamParser};
use crate::rotation::rotation_message;
use crate::state::AppState;
use crate::store::pool::RotationOutcome;
use crate::wire::OutboundMessage;

#[derive(Debug)]
pub enum LoopEvent {
    Content(String),
    Finish(String),
    Error(BridgeError),
}

/// Drains `rx` through the parser until the sub-stream ends, forwarding formatted
/// events to `out`. Owns the per-request cleanup: the channel-table entry and, for
/// `auto-*` requests, the active-auto tracking entry.
pub async fn drive_request(
    state: Arc<AppState>,
    mut rx: FrameReceiver,
    request_id: String,
    mut current_model: String,
    is_auto: bool,
    timeout: Duration,
    out: mpsc::Sender<LoopEvent>,
) {
    let mut parser = StreamParser::new();

    'outer: loop {
        let frame = match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                let _ = out.send(LoopEvent::Error(BridgeError::BrowserDisconnected)).await;
                break;
            }
            Err(_) => {
                let _ = out
                    .send(LoopEvent::Error(BridgeError::Timeout(timeout.as_secs())))
                    .await;
                break;
            }
        };

        let (events, outcome) = parser.feed(frame);
        for event in events {
            match event {
                ParserEvent::Content(text) => {
                    let _ = out.send(LoopEvent::Content(text)).await;
                }
                ParserEvent::Finish(reason) => {
                    let _ = out.send(LoopEvent::Finish(reason)).await;
                }
                ParserEvent::Error(message) => {
                    let _ = out.send(LoopEvent::Error(BridgeError::UpstreamError(message))).await;
                    break 'outer;
                }
                ParserEvent::AttachmentTooLarge => {
                    let _ = out
                        .send(LoopEvent::Error(BridgeError::AttachmentTooLarge(
                            "attachment exceeds the upstream's size limit (roughly 5 MB); compress or shrink it and retry"
                                .to_string(),
                        )))
                        .await;
                    break 'outer;
                }
                ParserEvent::CloudflareChallenge => {
                    if state.multiplexer.send(&OutboundMessage::refresh()).is_err() {
                        warn!(request_id, "could not send refresh command, browser already gone");
                    }
                    let _ = out
                        .send(LoopEvent::Error(BridgeError::CloudflareChallenge(
                            "Cloudflare human-verification page detected; refresh the upstream tab and complete it, then retry"
                                .to_string(),
                        )))
                        .await;
                    break 'outer;
                }
                ParserEvent::RateLimit { model_id } => {
                    if is_auto {
                        if !handle_auto_switch(&state, &request_id, &mut current_model, &mut parser, &out).await {
                            break 'outer;
                        }
                    } else {
                        handle_per_model_rotation(&state, &current_model, model_id, &out).await;
                        break 'outer;
                    }
                }
            }
        }

        if outcome.done {
            break;
        }
    }

    state.multiplexer.remove_channel(&request_id);
    if is_auto {
        state.fallback.clear(&request_id);
    }
}

/// Mid-stream `auto-claude` fallback switch (§4.4). Returns `false` if the loop should
/// terminate (no fallback credentials available, or the browser is gone).
async fn handle_auto_switch(
    state: &Arc<AppState>,
    request_id: &str,
    current_model: &mut String,
    parser: &mut StreamParser,
    out: &mpsc::Sender<LoopEvent>,
) -> bool {
    state.fallback.cool_down(current_model);
    let next_model = state.fallback.select(&state.catalog);
    state.fallback.track(request_id, &next_model);

    let _ = out
        .send(LoopEvent::Content(format!(
            "🔄 **Auto-Claude:** Rate limit detected for '{current_model}'. Switching to '{next_model}'..."
        )))
        .await;

    let Some(creds) = state.pool.resolve(&next_model) else {
        let _ = out
            .send(LoopEvent::Error(BridgeError::UnresolvedCredentials(format!(
                "no credentials configured for fallback model '{next_model}'"
            ))))
            .await;
        return false;
    };

    let new_model_id = state.catalog.resolve(&next_model);
    let switch = OutboundMessage::switch_model(request_id.to_string(), creds.session_id, creds.message_id, new_model_id);
    if state.multiplexer.send(&switch).is_err() {
        let _ = out.send(LoopEvent::Error(BridgeError::BrowserDisconnected)).await;
        return false;
    }

    info!(request_id, from = %current_model, to = %next_model, "auto-claude switched model mid-stream");
    *current_model = next_model;
    *parser = StreamParser::new();
    true
}

/// Per-model rotation (§4.4): always terminates the current sub-stream with a single
/// explanatory assistant turn, never retries transparently.
async fn handle_per_model_rotation(
    state: &Arc<AppState>,
    current_model: &str,
    model_id: Option<String>,
    out: &mpsc::Sender<LoopEvent>,
) {
    let resolved_name = match model_id {
        Some(id) => state.catalog.lookup_name_by_id(&id),
        None => Some(current_model.to_string()),
    };

    let message = match resolved_name {
        Some(name) => {
            let outcome = state.pool.rotate(&name);
            let rotated = matches!(outcome, RotationOutcome::Rotated { .. });
            rotation_message(&name, rotated)
        }
        None => "🔄 I detected a rate limit, but couldn't identify the specific model to rotate automatically. \
            Please retry your request in a few minutes."
            .to_string(),
    };

    let _ = out.send(LoopEvent::Content(message)).await;
    let _ = out.send(LoopEvent::Finish("stop".to_string())).await;
}
