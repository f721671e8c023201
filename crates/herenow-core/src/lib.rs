//! Core protocol for the Herenow realtime client
//!
//! This crate holds the pure parts of the realtime connection subsystem:
//! the link lifecycle state machine, the reconnection policy, the wire
//! envelopes, and the listener registry. It has no networking and no async
//! runtime; the `herenow-client` crate drives these pieces against a real
//! transport.

pub mod config;
pub mod envelope;
pub mod errors;
pub mod link;
pub mod registry;
pub mod retry;
pub mod types;

pub use config::ConnectionConfig;
pub use envelope::{Boundaries, GeoPoint, InboundEnvelope, OutboundEnvelope};
pub use errors::{HerenowError, Result};
pub use link::{Effect, LinkEvent, LinkState, LinkStatus, Transition};
pub use registry::{ListenerRegistry, Subscription};
pub use retry::RetryPolicy;
pub use types::{AppId, Credential};
