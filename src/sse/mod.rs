//! Server-sent-events fan-out for the runtime dashboard.

pub mod hub;

pub use hub::{HubMessage, SseHub, SSE_HEARTBEAT_INTERVAL_MS, SSE_RETRY_MS};
