//! Host-facing side of the bridge: operations, fallbacks and result shaping.

pub mod adapter;
pub mod fallback;

pub use adapter::UpstreamAdapter;
pub use fallback::{fallback, tool_error, UNAVAILABLE_NOTICE};
