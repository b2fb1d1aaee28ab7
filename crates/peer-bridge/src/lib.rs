//! peer-bridge - forwards host JSON-RPC requests to a single WebSocket peer.
//!
//! The host talks line-delimited JSON-RPC 2.0 over stdio. Each forwarded
//! request becomes one correlated round trip to the peer attached on the
//! WebSocket listener; with no peer attached the host gets a safe fallback.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       PEER BRIDGE                          │
//! ├───────────────────────────────────────────────────────────┤
//! │  stdin/stdout ──► Host Server (JSON-RPC, one task/request) │
//! │                       │                                    │
//! │              ┌────────┴─────────┐                          │
//! │              │ Upstream Adapter │──► fallbacks (no peer)   │
//! │              └────────┬─────────┘                          │
//! │              ┌────────┴─────────┐                          │
//! │              │Request Dispatcher│  id + timeout race       │
//! │              └────────┬─────────┘                          │
//! │      ┌────────────────┴───────────────┐                    │
//! │      │ Round-Trip Registry (oneshot)  │◄── replies         │
//! │      └────────────────┬───────────────┘         │          │
//! │              ┌────────┴─────────┐               │          │
//! │              │Connection Manager│───────────────┘          │
//! │              │  (single slot)   │                          │
//! │              └────────┬─────────┘                          │
//! └───────────────────────┼───────────────────────────────────┘
//!                         │  ws://127.0.0.1:8742/
//!                         ▼
//!                       peer
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use peer_bridge::{BridgeConfig, BridgeService};
//!
//! let service = BridgeService::new(BridgeConfig::from_env()?)?;
//! service.run(tokio::io::stdin(), tokio::io::stdout()).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod dispatch;
pub mod domain;
pub mod host;
pub mod ports;
pub mod service;
pub mod telemetry;
pub mod upstream;
pub mod ws;

pub use dispatch::RequestDispatcher;
pub use domain::{
    ApiError, BridgeConfig, BridgeError, CorrelationId, DispatchError, PeerId, PeerOperation,
    RoundTripRegistry,
};
pub use host::{HostOutbox, HostServer};
pub use service::BridgeService;
pub use upstream::UpstreamAdapter;
pub use ws::{ConnectionManager, PeerSocketHandler};
