//! Outbound ports for the bridge.

use crate::domain::operations::Capability;

/// Tells the host that one of its capability lists may have changed.
///
/// Called from the connection manager while it is handling a socket event,
/// so implementations must not block.
pub trait HostNotifier: Send + Sync {
    fn list_changed(&self, capability: Capability);
}

/// Notifier that drops every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl HostNotifier for NoopNotifier {
    fn list_changed(&self, _capability: Capability) {}
}
