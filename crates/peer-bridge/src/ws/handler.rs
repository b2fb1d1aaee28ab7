//! WebSocket handler for the downstream peer.
//!
//! One handler per upgraded socket. The handler asks the connection manager
//! for the peer slot; a refused socket gets a policy-violation close frame,
//! an admitted one runs until the peer closes or errors.

use crate::domain::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::domain::correlation::PeerId;
use crate::domain::envelope::{DecodeError, OutboundMessage};
use crate::ws::connection::{ConnectionManager, ALREADY_CONNECTED_REASON};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Outbound frame queue depth per peer
pub const OUTBOUND_BUFFER: usize = 256;

/// Per-socket peer handler
pub struct PeerSocketHandler {
    manager: Arc<ConnectionManager>,
    peer_id: PeerId,
    max_message_size: usize,
}

impl PeerSocketHandler {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self::with_max_message_size(manager, DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(manager: Arc<ConnectionManager>, max_message_size: usize) -> Self {
        Self {
            manager,
            peer_id: PeerId::new(),
            max_message_size,
        }
    }

    /// Check message size, returns true if the frame may be processed
    fn check_message_size(&self, size: usize) -> bool {
        if size > self.max_message_size {
            let e = DecodeError::TooLarge {
                size,
                max: self.max_message_size,
            };
            warn!(peer_id = %self.peer_id, error = %e, "Dropping peer message");
            false
        } else {
            true
        }
    }

    /// Handle a WebSocket connection
    pub async fn handle(self, mut socket: WebSocket) {
        info!(peer_id = %self.peer_id, "New peer WebSocket connection");

        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_BUFFER);

        if self.manager.attach(self.peer_id, outbound_tx).is_err() {
            let frame = CloseFrame {
                code: close_code::POLICY,
                reason: ALREADY_CONNECTED_REASON.into(),
            };
            if let Err(e) = socket.send(Message::Close(Some(frame))).await {
                debug!(peer_id = %self.peer_id, error = %e, "Failed to send refusal close frame");
            }
            return;
        }

        let (sink, mut stream) = socket.split();
        let writer = tokio::spawn(write_frames(self.peer_id, sink, outbound_rx));

        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if self.check_message_size(text.len()) {
                        self.manager.handle_inbound(self.peer_id, &text).await;
                    }
                }
                Ok(Message::Binary(data)) => {
                    if !self.check_message_size(data.len()) {
                        continue;
                    }
                    match String::from_utf8(data) {
                        Ok(text) => self.manager.handle_inbound(self.peer_id, &text).await,
                        Err(_) => {
                            warn!(peer_id = %self.peer_id, "Dropping non UTF-8 binary peer message");
                        }
                    }
                }
                // Pongs are queued by the protocol layer itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    debug!(peer_id = %self.peer_id, frame = ?frame, "Peer close received");
                    break;
                }
                Err(e) => {
                    warn!(peer_id = %self.peer_id, error = %e, "Peer WebSocket error");
                    break;
                }
            }
        }

        self.manager.detach(self.peer_id);
        writer.abort();

        info!(peer_id = %self.peer_id, "Peer WebSocket connection closed");
    }
}

/// Drain the outbound queue into the socket until either side closes.
async fn write_frames(
    peer_id: PeerId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundMessage>,
) {
    while let Some(message) = outbound.recv().await {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                error!(peer_id = %peer_id, error = %e, "Failed to encode peer frame");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            error!(peer_id = %peer_id, error = %e, "Failed to send peer frame");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pending::RoundTripRegistry;
    use crate::ports::NoopNotifier;

    fn manager() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            Arc::new(RoundTripRegistry::new()),
            Arc::new(NoopNotifier),
        ))
    }

    #[test]
    fn test_message_size_limit() {
        let handler = PeerSocketHandler::with_max_message_size(manager(), 100);
        assert!(handler.check_message_size(100));
        assert!(!handler.check_message_size(101));
    }

    #[test]
    fn test_default_limit() {
        let handler = PeerSocketHandler::new(manager());
        assert!(handler.check_message_size(DEFAULT_MAX_MESSAGE_SIZE));
        assert!(!handler.check_message_size(DEFAULT_MAX_MESSAGE_SIZE + 1));
    }
}
