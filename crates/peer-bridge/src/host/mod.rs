//! Host side: JSON-RPC 2.0 over a line-delimited byte stream (stdio).

pub mod protocol;
pub mod server;

pub use protocol::{JsonRpcId, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ResponsePayload};
pub use server::{HostFrame, HostOutbox, HostServer};
