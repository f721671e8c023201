//! Realtime connection manager for the Herenow client
//!
//! Drives the pure link state machine from `herenow-core` against a real
//! transport: a single owned WebSocket channel with exponential-backoff
//! reconnection, fire-and-forget heartbeating, and listener fan-out of
//! inbound messages.

pub mod manager;
pub mod transport;

pub use manager::{ConnectionHandle, ConnectionManager};
pub use transport::{Channel, Frame, Transport, WebSocketTransport};

// Re-exports consumers need alongside the manager.
pub use herenow_core::{
    AppId, Boundaries, ConnectionConfig, Credential, GeoPoint, HerenowError, InboundEnvelope,
    LinkStatus, OutboundEnvelope, Result, RetryPolicy, Subscription,
};
