//! Downstream peer transport.
//!
//! - Single peer slot with first-connector-wins admission
//! - Inbound demultiplexing (liveness probe, ready announcement, replies)
//! - Message size limits

pub mod connection;
pub mod handler;

pub use connection::{
    AttachError, ConnectionManager, ConnectionStatus, PeerSender, ALREADY_CONNECTED_REASON,
};
pub use handler::{PeerSocketHandler, OUTBOUND_BUFFER};
