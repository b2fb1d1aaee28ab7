//! Request dispatcher: one correlated round trip to the peer.

use crate::domain::correlation::CorrelationId;
use crate::domain::envelope::RequestEnvelope;
use crate::domain::error::DispatchError;
use crate::domain::operations::PeerOperation;
use crate::domain::pending::{RegistryError, RoundTripRegistry, Waiter};
use crate::ws::ConnectionManager;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Sends requests to the peer and waits for the correlated reply.
pub struct RequestDispatcher {
    registry: Arc<RoundTripRegistry>,
    connections: Arc<ConnectionManager>,
    default_timeout: Duration,
}

impl RequestDispatcher {
    pub fn new(
        registry: Arc<RoundTripRegistry>,
        connections: Arc<ConnectionManager>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connections,
            default_timeout,
        }
    }

    /// Send `operation` to the peer and wait for its reply.
    ///
    /// Fails immediately with [`DispatchError::NoPeer`] if nothing is
    /// attached. One deadline covers queueing the request and waiting for the
    /// reply. The pending entry is removed on every exit path, including the
    /// returned future being dropped.
    pub async fn call(
        &self,
        operation: PeerOperation,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, DispatchError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;

        let (correlation_id, waiter) = self.register_fresh(operation);
        let _guard = PendingGuard {
            registry: &self.registry,
            correlation_id,
        };

        let envelope = RequestEnvelope {
            id: correlation_id,
            operation,
            params,
        };
        match tokio::time::timeout_at(deadline, self.connections.dispatch(envelope.into())).await {
            Ok(sent) => sent?,
            Err(_) => {
                warn!(
                    correlation_id = %correlation_id,
                    operation = operation.as_str(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Peer outbound queue stayed full, request timed out"
                );
                return Err(DispatchError::RoundTripTimeout {
                    operation: operation.as_str(),
                    timeout,
                });
            }
        }

        debug!(
            correlation_id = %correlation_id,
            operation = operation.as_str(),
            "Sent peer request"
        );

        match tokio::time::timeout_at(deadline, waiter).await {
            Ok(Ok(reply)) => {
                debug!(
                    correlation_id = %correlation_id,
                    operation = operation.as_str(),
                    response_time_ms = reply.response_time.as_millis() as u64,
                    success = reply.result.is_ok(),
                    "Peer reply received"
                );
                reply.result.map_err(DispatchError::PeerFailure)
            }
            // Sender dropped without a settlement: swept as stale
            Ok(Err(_)) => Err(DispatchError::Cancelled),
            Err(_) => {
                warn!(
                    correlation_id = %correlation_id,
                    operation = operation.as_str(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Peer request timed out"
                );
                Err(DispatchError::RoundTripTimeout {
                    operation: operation.as_str(),
                    timeout,
                })
            }
        }
    }

    /// Register under an id not currently pending.
    fn register_fresh(&self, operation: PeerOperation) -> (CorrelationId, Waiter) {
        loop {
            let correlation_id = CorrelationId::new();
            match self.registry.register(correlation_id, operation.as_str()) {
                Ok(waiter) => return (correlation_id, waiter),
                Err(RegistryError::DuplicateId(id)) => {
                    warn!(correlation_id = %id, "Correlation id collision, regenerating");
                }
            }
        }
    }
}

/// Abandons the pending entry when the call path exits.
///
/// After a settlement the entry is already gone and `abandon` is a no-op.
struct PendingGuard<'a> {
    registry: &'a RoundTripRegistry,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.abandon(&self.correlation_id);
    }
}
