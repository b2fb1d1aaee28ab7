//! Ports between the peer side and the host side of the bridge.

pub mod outbound;

pub use outbound::{HostNotifier, NoopNotifier};
