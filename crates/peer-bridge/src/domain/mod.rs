//! Domain types for the bridge.
//!
//! Correlation ids, wire envelopes, the round-trip registry, configuration
//! and error handling. Nothing in here touches a socket.

pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod operations;
pub mod pending;

// Re-exports for convenience
pub use config::{BridgeConfig, ConfigError};
pub use correlation::{CorrelationId, PeerId};
pub use envelope::{ControlMessage, DecodeError, InboundMessage, OutboundMessage, RequestEnvelope, RoundTripReply};
pub use error::{ApiError, ApiResult, BridgeError, DispatchError};
pub use operations::{Capability, PeerOperation};
pub use pending::{RegistryError, RoundTripRegistry, SettledReply, Waiter};
