//! Multiplexer (C4, §4.3): single-slot ownership of the browser duplex socket, and the
//! request-channel table that fans inbound frames out to whichever orchestrator call is
//! waiting on them.
//!
//! The socket itself is driven by `routes::ws`; this module only holds the state that
//! both the reader loop and every concurrent orchestrator call need to share.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::wire::{ControlFrame, Frame};

const CHANNEL_CAPACITY: usize = 64;

pub type FrameSender = mpsc::Sender<Frame>;
pub type FrameReceiver = mpsc::Receiver<Frame>;

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

struct BrowserSlot {
    generation: u64,
    writer: mpsc::UnboundedSender<Message>,
}

/// Owns the single browser connection slot and the request-channel table (§3, §4.3).
pub struct Multiplexer {
    slot: Mutex<Option<BrowserSlot>>,
    next_generation: AtomicU64,
    channels: DashMap<String, FrameSender>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            next_generation: AtomicU64::new(0),
            channels: DashMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Installs a new browser connection, superseding any previous one. A previous
    /// connection's outstanding requests can no longer be answered, so they're
    /// broadcast a disconnect sentinel exactly as a genuine loss would produce.
    ///
    /// Returns the generation tag the caller's reader loop must present back to
    /// [`Multiplexer::disconnect`], so a reader loop that already lost the race to a
    /// newer connection can't tear down that newer connection's state.
    pub fn connect(&self, writer: mpsc::UnboundedSender<Message>) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let had_previous = {
            let mut slot = self.slot.lock();
            let had_previous = slot.is_some();
            *slot = Some(BrowserSlot { generation, writer });
            had_previous
        };
        if had_previous {
            warn!("browser connection replaced while previous one was still active");
        }
        self.broadcast_disconnect();
        info!(generation, "browser connected");
        generation
    }

    pub fn disconnect(&self, generation: u64) {
        let cleared = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some(current) if current.generation == generation => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        };
        if cleared {
            info!(generation, "browser disconnected");
            self.broadcast_disconnect();
        }
    }

    /// Serializes `message` and hands it to the writer task. The `mpsc` queue itself
    /// provides the write serialization the concurrency contract requires (§4.3):
    /// concurrent callers enqueue, the single writer task drains one at a time.
    pub fn send(&self, message: &crate::wire::OutboundMessage) -> Result<(), SendError> {
        let slot = self.slot.lock();
        let slot = slot.as_ref().ok_or(SendError::Disconnected)?;
        let text = serde_json::to_string(message).expect("outbound message always serializes");
        slot.writer.send(Message::Text(text)).map_err(|_| SendError::Disconnected)
    }

    pub fn register_channel(&self, request_id: String) -> FrameReceiver {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.channels.insert(request_id, tx);
        rx
    }

    pub fn remove_channel(&self, request_id: &str) {
        self.channels.remove(request_id);
    }

    /// Routes one inbound `{request_id, data}` frame. A lookup miss is expected after a
    /// request has been cancelled and must not be treated as an error.
    pub fn dispatch_inbound(&self, request_id: &str, frame: Frame) {
        match self.channels.get(request_id) {
            Some(sender) => {
                if sender.try_send(frame).is_err() {
                    warn!(request_id, "request channel full or closed, dropping frame");
                }
            }
            None => {
                warn!(request_id, "no channel for request id, dropping frame");
            }
        }
    }

    fn broadcast_disconnect(&self) {
        for entry in self.channels.iter() {
            let _ = entry.value().try_send(Frame::Control(ControlFrame {
                error: Some("browser disconnected".to_string()),
                ..Default::default()
            }));
        }
        self.channels.clear();
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_then_disconnect_clears_slot() {
        let mux = Multiplexer::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let gen = mux.connect(tx);
        assert!(mux.is_connected());
        mux.disconnect(gen);
        assert!(!mux.is_connected());
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_clear_newer_connection() {
        let mux = Multiplexer::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let gen1 = mux.connect(tx1);
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let _gen2 = mux.connect(tx2);

        mux.disconnect(gen1);
        assert!(mux.is_connected());
    }

    #[tokio::test]
    async fn replacing_connection_broadcasts_disconnect_to_outstanding_channels() {
        let mux = Multiplexer::new();
        let mut rx = mux.register_channel("req-1".to_string());

        let (tx, _rx) = mpsc::unbounded_channel();
        mux.connect(tx);

        let frame = rx.recv().await.expect("disconnect sentinel");
        match frame {
            Frame::Control(c) => assert!(c.error.is_some()),
            other => panic!("expected control frame, got {other:?}"),
        }
    }

    #[test]
    fn send_without_connection_errors() {
        let mux = Multiplexer::new();
        let msg = crate::wire::OutboundMessage::reconnect();
        assert_eq!(mux.send(&msg), Err(SendError::Disconnected));
    }
}
