//! Correlation ID for pairing peer replies with outstanding requests.
//!
//! Uses UUID v7 so ids are unique without coordination and sort by creation
//! time in logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque token linking an outbound request to its future reply.
///
/// Serialized as the hyphenated UUID string; the peer echoes it back verbatim
/// in the `id` field of its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID (UUID v7)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an accepted (or refused) peer socket, used in logs and the
/// health document.
pub type PeerId = CorrelationId;
