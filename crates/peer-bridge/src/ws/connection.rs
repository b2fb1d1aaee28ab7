//! Connection manager: owner of the single peer slot.
//!
//! States are `Disconnected` and `Connected`. The first peer to attach wins;
//! later attempts are refused while it stays attached. Detaching does not
//! fail in-flight round trips, they run into their own timeout.

use crate::domain::correlation::PeerId;
use crate::domain::envelope::{ControlMessage, InboundMessage, OutboundMessage};
use crate::domain::error::DispatchError;
use crate::domain::operations::Capability;
use crate::domain::pending::RoundTripRegistry;
use crate::ports::HostNotifier;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Close reason sent to a peer refused because another one is attached
pub const ALREADY_CONNECTED_REASON: &str = "Already connected to a client.";

/// Sending half of a peer's outbound frame queue
pub type PeerSender = mpsc::Sender<OutboundMessage>;

/// The attached peer
struct PeerConnection {
    peer_id: PeerId,
    outbound: PeerSender,
    attached_at: DateTime<Utc>,
}

enum ConnectionState {
    Disconnected,
    Connected(PeerConnection),
}

/// Attachment refusal
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachError {
    #[error("Already connected to a client (attached peer: {existing})")]
    AlreadyConnected { existing: PeerId },
}

/// Snapshot of the slot for health reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub attached: bool,
    pub peer_id: Option<PeerId>,
    pub attached_at: Option<DateTime<Utc>>,
}

/// Owns the peer slot and demultiplexes inbound peer messages.
pub struct ConnectionManager {
    state: Mutex<ConnectionState>,
    /// Mirrors `state` for waiters; true while a peer is attached
    attached: watch::Sender<bool>,
    registry: Arc<RoundTripRegistry>,
    notifier: Arc<dyn HostNotifier>,
}

impl ConnectionManager {
    pub fn new(registry: Arc<RoundTripRegistry>, notifier: Arc<dyn HostNotifier>) -> Self {
        let (attached, _) = watch::channel(false);
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            attached,
            registry,
            notifier,
        }
    }

    /// Attach `peer_id` if the slot is free.
    ///
    /// On success the host is told its resource, prompt and tool lists may
    /// have changed. On refusal the attached peer is not touched.
    pub fn attach(&self, peer_id: PeerId, outbound: PeerSender) -> Result<(), AttachError> {
        {
            let mut state = self.state.lock();
            if let ConnectionState::Connected(existing) = &*state {
                warn!(
                    peer_id = %peer_id,
                    attached_peer_id = %existing.peer_id,
                    "Refusing peer, another peer is already attached"
                );
                return Err(AttachError::AlreadyConnected {
                    existing: existing.peer_id,
                });
            }

            *state = ConnectionState::Connected(PeerConnection {
                peer_id,
                outbound,
                attached_at: Utc::now(),
            });
        }

        self.attached.send_replace(true);
        info!(peer_id = %peer_id, "Peer attached");
        self.notify_capabilities_changed();
        Ok(())
    }

    /// Clear the slot if `peer_id` is the attached peer.
    ///
    /// Returns false for a peer that was never attached (a refused one).
    pub fn detach(&self, peer_id: PeerId) -> bool {
        {
            let mut state = self.state.lock();
            match &*state {
                ConnectionState::Connected(current) if current.peer_id == peer_id => {
                    *state = ConnectionState::Disconnected;
                }
                _ => return false,
            }
        }

        self.attached.send_replace(false);
        info!(
            peer_id = %peer_id,
            pending = self.registry.pending_count(),
            "Peer detached"
        );
        true
    }

    pub fn is_attached(&self) -> bool {
        matches!(&*self.state.lock(), ConnectionState::Connected(_))
    }

    pub fn status(&self) -> ConnectionStatus {
        match &*self.state.lock() {
            ConnectionState::Connected(peer) => ConnectionStatus {
                attached: true,
                peer_id: Some(peer.peer_id),
                attached_at: Some(peer.attached_at),
            },
            ConnectionState::Disconnected => ConnectionStatus {
                attached: false,
                peer_id: None,
                attached_at: None,
            },
        }
    }

    /// Wait until a peer is attached, at most `timeout`.
    pub async fn wait_for_attachment(&self, timeout: Duration) -> Result<(), DispatchError> {
        let mut attached = self.attached.subscribe();

        let outcome = tokio::time::timeout(timeout, attached.wait_for(|is_attached| *is_attached))
            .await
            .map(|waited| waited.map(|_| ()));

        match outcome {
            Ok(Ok(())) => Ok(()),
            // Sender lives as long as `self`, so a closed channel means shutdown
            Ok(Err(_)) | Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "No peer attached in time");
                Err(DispatchError::ConnectionTimeout(timeout))
            }
        }
    }

    /// Queue a frame for the attached peer, waiting for queue space.
    ///
    /// Callers bound the wait themselves; a stalled peer writer keeps the
    /// queue full.
    pub async fn dispatch(&self, message: OutboundMessage) -> Result<(), DispatchError> {
        let (peer_id, outbound) = self.current_peer()?;

        outbound.send(message).await.map_err(|_| {
            warn!(peer_id = %peer_id, "Peer writer closed while sending");
            DispatchError::Transport(format!("peer {} writer closed", peer_id))
        })
    }

    /// Queue a frame for the attached peer without waiting.
    pub fn try_dispatch(&self, message: OutboundMessage) -> Result<(), DispatchError> {
        let (peer_id, outbound) = self.current_peer()?;

        outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                DispatchError::Transport(format!("peer {} outbound queue full", peer_id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                DispatchError::Transport(format!("peer {} writer closed", peer_id))
            }
        })
    }

    fn current_peer(&self) -> Result<(PeerId, PeerSender), DispatchError> {
        match &*self.state.lock() {
            ConnectionState::Connected(peer) => Ok((peer.peer_id, peer.outbound.clone())),
            ConnectionState::Disconnected => Err(DispatchError::NoPeer),
        }
    }

    /// Decode and handle one text frame from `peer_id`.
    ///
    /// Malformed and unrecognized frames are logged and dropped; the
    /// connection stays open.
    pub async fn handle_inbound(&self, peer_id: PeerId, text: &str) {
        match InboundMessage::decode(text) {
            Ok(message) => self.handle_message(peer_id, message).await,
            Err(e) => {
                warn!(peer_id = %peer_id, error = %e, "Dropping peer message");
            }
        }
    }

    /// Route a decoded peer message.
    pub async fn handle_message(&self, peer_id: PeerId, message: InboundMessage) {
        debug!(peer_id = %peer_id, kind = message.kind(), "Peer message received");

        match message {
            InboundMessage::LivenessProbe => {
                // Never wait here: replies behind this frame must keep settling
                if let Err(e) = self.try_dispatch(ControlMessage::LivenessAck.into()) {
                    warn!(peer_id = %peer_id, error = %e, "Failed to acknowledge liveness probe");
                }
            }
            InboundMessage::PeerAnnouncedReady => {
                info!(peer_id = %peer_id, "Peer announced ready");
                self.notify_capabilities_changed();
            }
            InboundMessage::RoundTripReply(reply) => {
                let correlation_id = reply.id;
                if !self.registry.settle(correlation_id, reply.into_outcome()) {
                    debug!(
                        peer_id = %peer_id,
                        correlation_id = %correlation_id,
                        "Ignoring late round-trip reply"
                    );
                }
            }
        }
    }

    fn notify_capabilities_changed(&self) {
        for capability in Capability::ALL {
            self.notifier.list_changed(capability);
        }
    }
}
